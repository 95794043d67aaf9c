use std::future::Future;

use log::LevelFilter;
use tokio::task::LocalSet;

/// Runs `f` on a current thread runtime whose clock only moves when every task is idle.
pub fn start_test(f: impl Future<Output = ()>) {
    tokio_test::block_on(async move {
        bt_hf_client::init_logging(LevelFilter::Debug);
        tokio::time::pause();
        LocalSet::new().run_until(f).await;
    });
}
