//! Capability bitsets negotiated during service level connection setup.

use bitflags::bitflags;

bitflags! {
    /// AG features reported in the +BRSF response.
    #[derive(Default)]
    pub struct PeerFeatures: u32 {
        const THREE_WAY = 0x0001;
        const ECNR = 0x0002;
        const VREC = 0x0004;
        const INBAND = 0x0008;
        const VTAG = 0x0010;
        const REJECT = 0x0020;
        const ECS = 0x0040;
        const ECC = 0x0080;
        const EXTERR = 0x0100;
        const CODEC = 0x0200;
        const HF_IND = 0x0400;
        const ESCO_S4 = 0x0800;
    }
}

bitflags! {
    /// AG call hold and multiparty handling reported in the +CHLD test response.
    #[derive(Default)]
    pub struct ChldFeatures: u32 {
        const REL = 0x01;
        const REL_ACC = 0x02;
        const REL_X = 0x04;
        const HOLD_ACC = 0x08;
        const PRIV_X = 0x10;
        const MERGE = 0x20;
        const MERGE_DETACH = 0x40;
    }
}

bitflags! {
    /// Call features of the AG as exposed to callers.
    #[derive(Default)]
    pub struct AgCallFeatures: u32 {
        const THREE_WAY_CALLING = 1 << 0;
        const VOICE_RECOGNITION = 1 << 1;
        const ATTACH_NUMBER_TO_VOICE_TAG = 1 << 2;
        const REJECT_CALL = 1 << 3;
        const ECC = 1 << 4;
        const ACCEPT_HELD_OR_WAITING_CALL = 1 << 5;
        const RELEASE_HELD_OR_WAITING_CALL = 1 << 6;
        const RELEASE_AND_ACCEPT = 1 << 7;
        const MERGE = 1 << 8;
        const MERGE_AND_DETACH = 1 << 9;
    }
}

impl PeerFeatures {
    pub fn from_raw(bits: u32) -> PeerFeatures {
        PeerFeatures::from_bits_truncate(bits)
    }
}

impl ChldFeatures {
    pub fn from_raw(bits: u32) -> ChldFeatures {
        ChldFeatures::from_bits_truncate(bits)
    }
}

impl AgCallFeatures {
    /// Derives the advertised call features from the latched SLC bitsets.
    pub fn from_negotiated(peer: PeerFeatures, chld: ChldFeatures) -> AgCallFeatures {
        let mut features = AgCallFeatures::empty();

        features.set(AgCallFeatures::THREE_WAY_CALLING, peer.contains(PeerFeatures::THREE_WAY));
        features.set(AgCallFeatures::VOICE_RECOGNITION, peer.contains(PeerFeatures::VREC));
        features.set(AgCallFeatures::ATTACH_NUMBER_TO_VOICE_TAG, peer.contains(PeerFeatures::VTAG));
        features.set(AgCallFeatures::REJECT_CALL, peer.contains(PeerFeatures::REJECT));
        features.set(AgCallFeatures::ECC, peer.contains(PeerFeatures::ECC));

        features.set(
            AgCallFeatures::ACCEPT_HELD_OR_WAITING_CALL,
            chld.contains(ChldFeatures::HOLD_ACC),
        );
        features.set(
            AgCallFeatures::RELEASE_HELD_OR_WAITING_CALL,
            chld.contains(ChldFeatures::REL),
        );
        features.set(AgCallFeatures::RELEASE_AND_ACCEPT, chld.contains(ChldFeatures::REL_ACC));
        features.set(AgCallFeatures::MERGE, chld.contains(ChldFeatures::MERGE));
        features.set(AgCallFeatures::MERGE_AND_DETACH, chld.contains(ChldFeatures::MERGE_DETACH));

        features
    }
}
