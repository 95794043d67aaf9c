use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Timeouts owned by one HF client state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Waiting for the service level connection.
    Connecting,
    /// Next AT+CLCC poll.
    QueryCurrentCalls,
    /// Waiting for the AG to report a locally dialed call.
    OutgoingCall,
}

/// Deadlines per timer. Nothing fires on its own: the event loop sleeps until
/// [`TimerSchedule::next_deadline`] and feeds [`TimerSchedule::expire`] back
/// in as messages.
#[derive(Debug, Default)]
pub struct TimerSchedule {
    deadlines: HashMap<TimerKind, Instant>,
}

impl TimerSchedule {
    pub fn new() -> Self {
        TimerSchedule::default()
    }

    /// Arms `kind` to fire after `duration`, replacing any earlier deadline.
    pub fn set(&mut self, kind: TimerKind, duration: Duration) {
        let wake = Instant::now() + duration;
        self.deadlines.entry(kind).and_modify(|v| *v = wake).or_insert(wake);
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        self.deadlines.remove(&kind);
    }

    pub fn cancel_all(&mut self) {
        self.deadlines.clear();
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.deadlines.contains_key(&kind)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    /// Removes and returns the timers due by now, earliest first.
    pub fn expire(&mut self) -> Vec<TimerKind> {
        self.expire_at(Instant::now())
    }

    pub fn expire_at(&mut self, now: Instant) -> Vec<TimerKind> {
        let mut completed: Vec<(Instant, TimerKind)> = self
            .deadlines
            .iter()
            .filter(|(_, expiry)| **expiry <= now)
            .map(|(kind, expiry)| (*expiry, *kind))
            .collect();
        completed.sort_by_key(|(expiry, _)| *expiry);

        for (_, kind) in &completed {
            self.deadlines.remove(kind);
        }

        completed.into_iter().map(|(_, kind)| kind).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expire_in_deadline_order() {
        let mut timers = TimerSchedule::new();
        timers.set(TimerKind::OutgoingCall, Duration::from_secs(10));
        timers.set(TimerKind::QueryCurrentCalls, Duration::from_secs(2));
        timers.set(TimerKind::Connecting, Duration::from_secs(30));

        let now = Instant::now();
        assert!(timers.expire_at(now).is_empty());
        assert_eq!(
            timers.expire_at(now + Duration::from_secs(11)),
            vec![TimerKind::QueryCurrentCalls, TimerKind::OutgoingCall]
        );
        assert!(timers.is_armed(TimerKind::Connecting));
        assert!(!timers.is_armed(TimerKind::OutgoingCall));
    }

    #[test]
    fn test_set_replaces_deadline() {
        let mut timers = TimerSchedule::new();
        timers.set(TimerKind::Connecting, Duration::from_secs(1));
        let first = timers.next_deadline().unwrap();
        timers.set(TimerKind::Connecting, Duration::from_secs(5));
        assert!(timers.next_deadline().unwrap() > first);
        assert!(timers.expire_at(first + Duration::from_secs(1)).is_empty());
    }

    #[test]
    fn test_cancel() {
        let mut timers = TimerSchedule::new();
        timers.set(TimerKind::Connecting, Duration::from_secs(1));
        timers.set(TimerKind::QueryCurrentCalls, Duration::from_secs(1));
        timers.cancel(TimerKind::Connecting);
        assert!(!timers.is_armed(TimerKind::Connecting));
        timers.cancel_all();
        assert_eq!(timers.next_deadline(), None);
    }
}
