//! Timeout constants and helpers.

use std::future::Future;
use std::time::Duration;

use crate::error::{ProtocolError, Result};

/// Default timeout for connecting and for a single request/response exchange
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time allowed for the whole login handshake
pub const LOGIN_TIMEOUT: Duration = Duration::from_secs(20);

/// Default interval between heartbeats
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(90);

/// Default deadline for a heartbeat response
pub const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(5);

/// Run `future` with a deadline, mapping expiry to [`ProtocolError::Timeout`].
pub async fn with_timeout_error<F, T>(future: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}
