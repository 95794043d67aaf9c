//! Runtime helpers for driving HF client state machines, typically for usage
//! only in test

use std::{future::Future, time::Duration};

use tokio::{runtime::Builder, select, task::LocalSet};

/// Run the supplied future on a single-threaded runtime with a paused clock,
/// so connection and call timeouts elapse instantly once every task is idle.
pub fn block_on_locally<T>(f: impl Future<Output = T>) -> T {
    let rt = match Builder::new_current_thread().enable_time().start_paused(true).build() {
        Ok(rt) => rt,
        Err(e) => panic!("failed to build test runtime: {}", e),
    };
    LocalSet::new().block_on(&rt, async move {
        select! {
            t = f => t,
            // NOTE: this time should be LARGER than any HF client timeout
            _ = tokio::time::sleep(Duration::from_secs(100000)) => {
                panic!("test appears to be stuck");
            },
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[test]
    fn test_clock_is_paused() {
        block_on_locally(async {
            let start = Instant::now();
            tokio::time::sleep(Duration::from_secs(60)).await;
            assert!(start.elapsed() >= Duration::from_secs(60));
        });
    }

    #[test]
    #[should_panic(expected = "test appears to be stuck")]
    fn test_stuck_future_panics() {
        block_on_locally(std::future::pending::<()>());
    }
}
