use crate::process::types::SERVICE_HOST;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Connect timeout used by [`is_bound`]
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// True iff something accepts TCP connections on the local port right now.
///
/// Any connect error (refused, timeout, unreachable) reads as "not bound".
pub async fn is_bound(port: u16) -> bool {
    is_bound_within(port, CONNECT_TIMEOUT).await
}

pub async fn is_bound_within(port: u16, limit: Duration) -> bool {
    matches!(
        timeout(limit, TcpStream::connect((SERVICE_HOST, port))).await,
        Ok(Ok(_))
    )
}
