//! Receive buffer shared by the drain task and readers.
//!
//! A FIFO byte queue whose length is the availability counter: only drains
//! grow it and only reader claims shrink it, both under the buffer's own
//! lock.  The hardware mutex is never taken here, so a reader never waits on
//! hardware activity.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Default)]
struct Inner {
    bytes: VecDeque<u8>,
    appended: u64,
    claimed: u64,
}

/// Thread-safe byte FIFO with arrival notification.
#[derive(Default)]
pub struct ReceiveBuffer {
    inner: Mutex<Inner>,
    arrived: Notify,
}

impl ReceiveBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append drained bytes and wake every waiter.
    pub fn push(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        {
            let mut inner = self.inner.lock();
            inner.bytes.extend(data);
            inner.appended += data.len() as u64;
        }
        self.arrived.notify_waiters();
    }

    /// Claim up to `buf.len()` bytes into `buf`; never waits.
    ///
    /// The claim is all-or-nothing against the availability observed under
    /// the lock, so concurrent readers never receive the same byte.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }
        let mut inner = self.inner.lock();
        let n = buf.len().min(inner.bytes.len());
        if n == 0 {
            return 0;
        }
        for (dst, src) in buf.iter_mut().zip(inner.bytes.drain(..n)) {
            *dst = src;
        }
        inner.claimed += n as u64;
        n
    }

    /// Claim up to `max` bytes into a fresh vector.
    pub fn read_to_vec(&self, max: usize) -> Vec<u8> {
        let mut inner = self.inner.lock();
        let n = max.min(inner.bytes.len());
        let out: Vec<u8> = inner.bytes.drain(..n).collect();
        inner.claimed += n as u64;
        out
    }

    /// Bytes queued and not yet claimed.
    pub fn available(&self) -> usize {
        self.inner.lock().bytes.len()
    }

    /// Total bytes ever appended.
    pub fn total_appended(&self) -> u64 {
        self.inner.lock().appended
    }

    /// Total bytes ever claimed by readers.
    pub fn total_claimed(&self) -> u64 {
        self.inner.lock().claimed
    }

    /// Wait for the next append.
    pub async fn notified(&self) {
        self.arrived.notified().await;
    }

    /// Wait until at least `min` bytes are queued or `timeout` elapses.
    ///
    /// Returns `true` when the threshold was reached.
    pub async fn wait_available(&self, min: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.arrived.notified();
            tokio::pin!(notified);
            // Register before checking so an append in between is not missed.
            notified.as_mut().enable();
            if self.available() >= min {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.available() >= min;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fifo_across_chunks() {
        let buf = ReceiveBuffer::new();
        buf.push(b"hello ");
        buf.push(b"");
        buf.push(b"wor");
        buf.push(b"ld");
        let mut out = [0u8; 64];
        let n = buf.read(&mut out);
        assert_eq!(&out[..n], b"hello world");
        assert_eq!(buf.available(), 0);
    }

    #[test]
    fn test_read_zero_and_empty() {
        let buf = ReceiveBuffer::new();
        let mut out = [0u8; 8];
        assert_eq!(buf.read(&mut out), 0);
        buf.push(b"abc");
        assert_eq!(buf.read(&mut []), 0);
        assert_eq!(buf.available(), 3);
    }

    #[test]
    fn test_partial_reads_preserve_order() {
        let buf = ReceiveBuffer::new();
        buf.push(b"0123456789");
        assert_eq!(buf.read_to_vec(4), b"0123");
        assert_eq!(buf.available(), 6);
        assert_eq!(buf.read_to_vec(100), b"456789");
        assert_eq!(buf.read_to_vec(100), b"");
    }

    #[test]
    fn test_availability_accounting() {
        let buf = ReceiveBuffer::new();
        buf.push(&[1; 10]);
        buf.push(&[2; 5]);
        let _ = buf.read_to_vec(7);
        assert_eq!(buf.total_appended(), 15);
        assert_eq!(buf.total_claimed(), 7);
        assert_eq!(
            buf.available() as u64,
            buf.total_appended() - buf.total_claimed()
        );
    }

    #[test]
    fn test_concurrent_readers_never_share_bytes() {
        let buf = Arc::new(ReceiveBuffer::new());
        let data: Vec<u8> = (0..=255u8).cycle().take(20_000).collect();
        buf.push(&data);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let buf = buf.clone();
                std::thread::spawn(move || {
                    let mut got = Vec::new();
                    loop {
                        let chunk = buf.read_to_vec(37);
                        if chunk.is_empty() {
                            break;
                        }
                        got.extend(chunk);
                    }
                    got.len()
                })
            })
            .collect();

        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, data.len());
        assert_eq!(buf.total_claimed(), data.len() as u64);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_available_times_out() {
        let buf = ReceiveBuffer::new();
        buf.push(b"ab");
        let start = tokio::time::Instant::now();
        assert!(!buf.wait_available(3, Duration::from_millis(100)).await);
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_available_wakes_on_push() {
        let buf = Arc::new(ReceiveBuffer::new());
        let producer = buf.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            producer.push(b"x");
            tokio::time::sleep(Duration::from_millis(10)).await;
            producer.push(b"yz");
        });
        assert!(buf.wait_available(3, Duration::from_secs(5)).await);
        assert_eq!(buf.read_to_vec(3), b"xyz");
    }

    #[tokio::test]
    async fn test_wait_available_already_satisfied() {
        let buf = ReceiveBuffer::new();
        buf.push(b"abc");
        assert!(buf.wait_available(2, Duration::from_millis(1)).await);
    }
}
