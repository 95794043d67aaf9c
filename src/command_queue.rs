//! Correlation of untagged AT results with the local actions that caused them.
//!
//! AT final results carry no transaction id. Every queueable command is
//! recorded here when handed to the native layer and the oldest entry is
//! resolved by the next final result the state machine does not claim for
//! itself.

use crate::native::CallAction;

use std::collections::VecDeque;
use std::fmt::{Display, Formatter};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActionTag {
    AcceptCall,
    RejectCall,
    HoldCall,
    TerminateCall,
    DialNumber,
    SendDtmf,
    EnterPrivateMode,
    ExplicitCallTransfer,
    SendVendorCommand,
    SendBiev,
    VoiceRecognitionStart,
    VoiceRecognitionStop,
    SendAndroidAt,
    QueryOperatorName,
    RetrieveSubscriberInfo,
    DisableNrec,
}

/// What the pending command was sent with, for its completion handler.
#[derive(Clone, Debug, PartialEq)]
pub enum ActionPayload {
    None,
    CallAction(CallAction),
    /// Call index addressed by the action.
    Index(u32),
    Number(String),
    Dtmf(char),
    VendorCommand { vendor_id: u16, command: String },
    Biev { indicator_id: u32, value: u32 },
    Text(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct QueuedAction {
    pub tag: ActionTag,
    pub payload: ActionPayload,
}

#[derive(Debug, PartialEq)]
pub enum CommandQueueError {
    /// An action with this tag is still waiting for its result.
    AlreadyPending(ActionTag),
}

impl Display for CommandQueueError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandQueueError::AlreadyPending(tag) => write!(f, "{:?} is already pending", tag),
        }
    }
}

impl std::error::Error for CommandQueueError {}

#[derive(Debug, Default)]
pub struct CommandQueue {
    queue: VecDeque<QueuedAction>,
}

impl CommandQueue {
    pub fn new() -> CommandQueue {
        CommandQueue::default()
    }

    pub fn enqueue(
        &mut self,
        tag: ActionTag,
        payload: ActionPayload,
    ) -> Result<(), CommandQueueError> {
        if self.is_pending(tag) {
            return Err(CommandQueueError::AlreadyPending(tag));
        }
        self.queue.push_back(QueuedAction { tag, payload });
        Ok(())
    }

    pub fn is_pending(&self, tag: ActionTag) -> bool {
        self.queue.iter().any(|action| action.tag == tag)
    }

    pub fn front(&self) -> Option<&QueuedAction> {
        self.queue.front()
    }

    /// Pops the action the next unclaimed result belongs to.
    pub fn resolve_next(&mut self) -> Option<QueuedAction> {
        self.queue.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut queue = CommandQueue::new();
        queue.enqueue(ActionTag::EnterPrivateMode, ActionPayload::Index(2)).unwrap();
        queue.enqueue(ActionTag::SendDtmf, ActionPayload::Dtmf('5')).unwrap();

        assert_eq!(queue.resolve_next().unwrap().tag, ActionTag::EnterPrivateMode);
        assert_eq!(
            queue.resolve_next(),
            Some(QueuedAction { tag: ActionTag::SendDtmf, payload: ActionPayload::Dtmf('5') })
        );
        assert!(queue.resolve_next().is_none());
    }

    #[test]
    fn test_one_entry_per_tag() {
        let mut queue = CommandQueue::new();
        queue.enqueue(ActionTag::ExplicitCallTransfer, ActionPayload::None).unwrap();
        assert_eq!(
            queue.enqueue(ActionTag::ExplicitCallTransfer, ActionPayload::None),
            Err(CommandQueueError::AlreadyPending(ActionTag::ExplicitCallTransfer))
        );
        assert_eq!(queue.len(), 1);

        queue.resolve_next();
        assert!(queue.enqueue(ActionTag::ExplicitCallTransfer, ActionPayload::None).is_ok());
    }

    #[test]
    fn test_clear() {
        let mut queue = CommandQueue::new();
        queue.enqueue(ActionTag::AcceptCall, ActionPayload::CallAction(CallAction::Ata)).unwrap();
        queue.clear();
        assert!(queue.is_empty());
        assert!(!queue.is_pending(ActionTag::AcceptCall));
    }
}
