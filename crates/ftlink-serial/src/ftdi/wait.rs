//! Blocking waits on the receive buffer.
//!
//! These suspend only the caller.  The hardware mutex is never held while
//! waiting, so drains keep running and append the data being waited for.

use crate::ftdi::error::{FtError, FtResult};
use crate::ftdi::session::SessionCore;
use std::time::Duration;

const READ_TIMEOUT: &str = "read timeout";

/// Wait until the next drain appends data or `timeout` elapses.
///
/// Only valid while open.  Does not read anything.
pub(crate) async fn wait_for_data(core: &SessionCore, timeout: Duration) -> FtResult<()> {
    ensure_open(core)?;
    match tokio::time::timeout(timeout, core.buffer.notified()).await {
        Ok(()) => Ok(()),
        Err(_) => Err(timed_out(core)),
    }
}

/// Wait until at least `min` bytes are buffered or `timeout` elapses.
pub(crate) async fn wait_for_bytes(core: &SessionCore, min: usize, timeout: Duration) -> FtResult<()> {
    ensure_open(core)?;
    if core.buffer.wait_available(min, timeout).await {
        Ok(())
    } else {
        Err(timed_out(core))
    }
}

fn ensure_open(core: &SessionCore) -> FtResult<()> {
    if core.hardware.is_open() {
        return Ok(());
    }
    let err = FtError::not_open();
    core.set_error_string(&err.message);
    Err(err)
}

fn timed_out(core: &SessionCore) -> FtError {
    core.set_error_string(READ_TIMEOUT);
    FtError::timed_out(READ_TIMEOUT)
}

#[cfg(test)]
mod tests {
    use crate::ftdi::error::FtErrorKind;
    use crate::ftdi::session::DeviceSession;
    use crate::ftdi::simulated::SimulatedDriver;
    use std::time::Duration;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_wait_times_out_after_full_timeout() {
        let d = SimulatedDriver::with_ft232r();
        let session = DeviceSession::new(d.clone());
        session.open().await.unwrap();

        let start = Instant::now();
        let err = session
            .wait_for_data(Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err.kind, FtErrorKind::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(100));
        assert_eq!(session.error_string(), "read timeout");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_wakes_when_data_arrives() {
        let d = SimulatedDriver::with_ft232r();
        let session = DeviceSession::new(d.clone());
        session.open().await.unwrap();

        let producer = d.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            producer.inject_rx(b"late");
        });

        let start = Instant::now();
        session
            .wait_for_data(Duration::from_millis(100))
            .await
            .unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(100));
        assert_eq!(session.bytes_available(), 4);
    }

    #[tokio::test]
    async fn test_wait_requires_open() {
        let d = SimulatedDriver::with_ft232r();
        let session = DeviceSession::new(d);
        let err = session
            .wait_for_data(Duration::from_secs(10))
            .await
            .unwrap_err();
        assert_eq!(err.kind, FtErrorKind::NotOpen);
        let err = session
            .wait_for_bytes(1, Duration::from_secs(10))
            .await
            .unwrap_err();
        assert_eq!(err.kind, FtErrorKind::NotOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_bytes_threshold() {
        let d = SimulatedDriver::with_ft232r();
        let session = DeviceSession::new(d.clone());
        session.open().await.unwrap();

        let producer = d.clone();
        tokio::spawn(async move {
            for chunk in [&b"ab"[..], b"cd", b"ef"] {
                tokio::time::sleep(Duration::from_millis(10)).await;
                producer.inject_rx(chunk);
            }
        });

        session
            .wait_for_bytes(6, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(session.read_to_vec(6), b"abcdef");

        let err = session
            .wait_for_bytes(1, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }
}
