//! Bluetooth device address used to key every per-device structure.

use std::fmt::{Debug, Display, Formatter, Result};

/// Represents a Bluetooth address.
#[derive(Copy, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RawAddress {
    val: [u8; 6],
}

impl RawAddress {
    pub const fn new(val: [u8; 6]) -> RawAddress {
        RawAddress { val }
    }

    /// Parses an address in `XX:XX:XX:XX:XX:XX` form.
    pub fn from_string<S: Into<String>>(addr: S) -> Option<RawAddress> {
        let addr: String = addr.into();
        let s = addr.split(':').collect::<Vec<&str>>();

        if s.len() != 6 {
            return None;
        }

        let mut raw: [u8; 6] = [0; 6];
        for (i, part) in s.iter().enumerate() {
            if part.len() != 2 {
                return None;
            }
            raw[i] = u8::from_str_radix(part, 16).ok()?;
        }

        Some(RawAddress { val: raw })
    }

    pub fn to_byte_arr(&self) -> [u8; 6] {
        self.val
    }
}

impl Debug for RawAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        Display::fmt(self, f)
    }
}

impl Display for RawAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        f.write_fmt(format_args!(
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            self.val[0], self.val[1], self.val[2], self.val[3], self.val[4], self.val[5]
        ))
    }
}
