//! Fixed-interval reconnect policy shared by both bridge directions.
//!
//! A broker outage is never fatal: the caller keeps trying, forever, at a
//! constant interval (5 s by default) until it connects or shutdown is
//! requested.  There is no exponential growth and no attempt limit.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::error::BrokerError;

/// Resolves once `shutdown` carries `true` (or its sender is gone).
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Calls `connect` until it succeeds, sleeping `interval` after each failure.
///
/// Returns `None` if shutdown was requested before a connection was made.
/// Every attempt and failure is logged with its attempt number.
pub async fn connect_with_retry<T, F, Fut>(
    what: &str,
    interval: Duration,
    shutdown: &mut watch::Receiver<bool>,
    mut connect: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BrokerError>>,
{
    let mut attempt: u32 = 0;
    loop {
        if *shutdown.borrow() {
            return None;
        }

        attempt += 1;
        match connect().await {
            Ok(session) => {
                info!(attempt, "{what}: connected to broker");
                return Some(session);
            }
            Err(e) => {
                warn!(
                    attempt,
                    error = %e,
                    "{what}: broker connection failed, retrying in {}s",
                    interval.as_secs_f32()
                );
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = wait_for_shutdown(shutdown) => return None,
        }
    }
}
