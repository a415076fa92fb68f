//! Scriptable in-memory driver.
//!
//! A test double for the vendor library.  Every handle-scoped call is
//! recorded so tests can assert on the exact hardware traffic, any
//! operation can be scripted to fail with a chosen [`DriverStatus`], and
//! reads can be held open to observe overlapping calls.

use crate::ftdi::driver::*;
use crate::ftdi::types::{FlowControl, Parity, StopBits};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Driver operations that can be scripted to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HwOp {
    Enumerate,
    Open,
    SetBaudRate,
    SetDataCharacteristics,
    SetFlowControl,
    SetTimeouts,
    SetLatencyTimer,
    SetDtr,
    SetRts,
    Purge,
    ReadIdentity,
    LibraryVersion,
    ArmEvents,
    GetStatus,
    GetQueueStatus,
    GetModemStatus,
    Read,
    Write,
}

/// One recorded driver call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HwCall {
    Open(u32),
    Close(FtHandle),
    SetBaudRate(u32),
    SetDataCharacteristics {
        data_bits: u8,
        stop_bits: StopBits,
        parity: Parity,
    },
    SetFlowControl {
        flow: FlowControl,
        xon: u8,
        xoff: u8,
    },
    SetTimeouts {
        read_ms: u32,
        write_ms: u32,
    },
    SetLatencyTimer(u8),
    SetDtr(bool),
    SetRts(bool),
    Purge {
        rx: bool,
        tx: bool,
    },
    ReadIdentity,
    ArmEvents(EventMask),
    GetStatus,
    GetQueueStatus,
    GetModemStatus,
    Read(usize),
    Write(Vec<u8>),
}

#[derive(Default)]
struct SimState {
    nodes: Vec<DeviceNode>,
    identities: HashMap<u32, EepromIdentity>,
    failures: HashMap<HwOp, DriverStatus>,
    open_handles: HashMap<FtHandle, u32>,
    next_handle: u64,
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    modem_status: u32,
    pending_events: EventMask,
    armed: EventMask,
    notifier: Option<Arc<Notify>>,
    library_version: u32,
    read_gate: Option<Arc<Notify>>,
    calls: Vec<HwCall>,
}

/// In-memory driver for unit tests.
pub struct SimulatedDriver {
    state: Mutex<SimState>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    read_parked: Notify,
}

/// Counts one driver call as in flight until dropped.
struct InFlight<'a>(&'a SimulatedDriver);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl SimulatedDriver {
    /// Create a driver with no attached devices.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SimState {
                next_handle: 1,
                library_version: 0x0003_0211,
                ..Default::default()
            }),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            read_parked: Notify::new(),
        })
    }

    /// Create a driver with a single FT232R attached at index 0.
    pub fn with_ft232r() -> Arc<Self> {
        let driver = Self::new();
        driver.attach(
            0x0403,
            0x6001,
            5,
            EepromIdentity {
                manufacturer: "FTDI".to_string(),
                description: "FT232R USB UART".to_string(),
                serial_number: "a9xk2b1q".to_string(),
                vendor_id: 0x0403,
                product_id: 0x6001,
            },
        );
        driver
    }

    /// Append a device to the enumeration list.
    pub fn attach(&self, vendor_id: u16, product_id: u16, device_type: u32, identity: EepromIdentity) {
        let mut st = self.state.lock();
        let index = st.nodes.len() as u32;
        st.nodes
            .push(DeviceNode::new(index, vendor_id, product_id, device_type));
        st.identities.insert(index, identity);
    }

    /// Make every subsequent call of `op` fail with `status`.
    pub fn fail(&self, op: HwOp, status: DriverStatus) {
        self.state.lock().failures.insert(op, status);
    }

    /// Let `op` succeed again.
    pub fn clear_failure(&self, op: HwOp) {
        self.state.lock().failures.remove(&op);
    }

    pub fn set_library_version(&self, word: u32) {
        self.state.lock().library_version = word;
    }

    /// Queue received bytes and signal an RXCHAR event.
    pub fn inject_rx(&self, data: &[u8]) {
        let notifier = {
            let mut st = self.state.lock();
            st.rx.extend(data);
            st.pending_events |= EventMask::RXCHAR;
            st.notifier.clone()
        };
        if let Some(n) = notifier {
            n.notify_one();
        }
    }

    /// Update the modem status word and signal a MODEM_STATUS event.
    pub fn inject_modem_status(&self, word: u32) {
        let notifier = {
            let mut st = self.state.lock();
            st.modem_status = word;
            st.pending_events |= EventMask::MODEM_STATUS;
            st.notifier.clone()
        };
        if let Some(n) = notifier {
            n.notify_one();
        }
    }

    /// Update the modem status word without raising an event.
    pub fn set_modem_status(&self, word: u32) {
        self.state.lock().modem_status = word;
    }

    /// Signal arbitrary event causes.
    pub fn raise_events(&self, events: EventMask) {
        let notifier = {
            let mut st = self.state.lock();
            st.pending_events |= events;
            st.notifier.clone()
        };
        if let Some(n) = notifier {
            n.notify_one();
        }
    }

    /// Every recorded handle-scoped call, oldest first.
    pub fn calls(&self) -> Vec<HwCall> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Number of recorded purges.
    pub fn purge_count(&self) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| matches!(c, HwCall::Purge { .. }))
            .count()
    }

    /// Number of handles currently open.
    pub fn open_handle_count(&self) -> usize {
        self.state.lock().open_handles.len()
    }

    /// Bytes still queued in the simulated receive FIFO.
    pub fn rx_pending(&self) -> usize {
        self.state.lock().rx.len()
    }

    /// Drain everything written so far.
    pub fn drain_tx(&self) -> Vec<u8> {
        std::mem::take(&mut self.state.lock().tx)
    }

    /// Event mask most recently armed.
    pub fn armed_events(&self) -> EventMask {
        self.state.lock().armed
    }

    /// Hold every subsequent read until [`resume_reads`](Self::resume_reads).
    pub fn pause_reads(&self) {
        self.state.lock().read_gate = Some(Arc::new(Notify::new()));
    }

    /// Release a held read and stop holding new ones.
    pub fn resume_reads(&self) {
        if let Some(gate) = self.state.lock().read_gate.take() {
            gate.notify_one();
        }
    }

    /// Wait until a read is being held.
    pub async fn read_held(&self) {
        self.read_parked.notified().await;
    }

    /// Highest number of driver calls ever observed running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn track(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(self)
    }

    fn check(st: &SimState, op: HwOp) -> Result<(), DriverStatus> {
        match st.failures.get(&op) {
            Some(status) => Err(*status),
            None => Ok(()),
        }
    }

    fn check_handle(st: &SimState, handle: FtHandle) -> Result<(), DriverStatus> {
        if st.open_handles.contains_key(&handle) {
            Ok(())
        } else {
            Err(DriverStatus::InvalidHandle)
        }
    }

    /// Record `call`, then validate the handle and scripted failures.
    fn begin(&self, handle: FtHandle, op: HwOp, call: HwCall) -> Result<(), DriverStatus> {
        let mut st = self.state.lock();
        st.calls.push(call);
        Self::check_handle(&st, handle)?;
        Self::check(&st, op)
    }
}

#[async_trait::async_trait]
impl FtDriver for SimulatedDriver {
    async fn enumerate(&self) -> Result<Vec<DeviceNode>, DriverStatus> {
        let _op = self.track();
        let st = self.state.lock();
        Self::check(&st, HwOp::Enumerate)?;
        Ok(st.nodes.clone())
    }

    async fn open(&self, index: u32) -> Result<FtHandle, DriverStatus> {
        let _op = self.track();
        let mut st = self.state.lock();
        st.calls.push(HwCall::Open(index));
        Self::check(&st, HwOp::Open)?;
        if index as usize >= st.nodes.len() {
            return Err(DriverStatus::DeviceNotFound);
        }
        if st.open_handles.values().any(|i| *i == index) {
            return Err(DriverStatus::DeviceNotOpened);
        }
        let handle = FtHandle(st.next_handle);
        st.next_handle += 1;
        st.open_handles.insert(handle, index);
        Ok(handle)
    }

    async fn close(&self, handle: FtHandle) -> Result<(), DriverStatus> {
        let _op = self.track();
        let mut st = self.state.lock();
        st.calls.push(HwCall::Close(handle));
        if st.open_handles.remove(&handle).is_some() {
            st.notifier = None;
            st.armed = EventMask::empty();
            Ok(())
        } else {
            Err(DriverStatus::InvalidHandle)
        }
    }

    async fn set_baud_rate(&self, handle: FtHandle, baud: u32) -> Result<(), DriverStatus> {
        let _op = self.track();
        self.begin(handle, HwOp::SetBaudRate, HwCall::SetBaudRate(baud))?;
        if baud == 0 {
            return Err(DriverStatus::InvalidBaudRate);
        }
        Ok(())
    }

    async fn set_data_characteristics(
        &self,
        handle: FtHandle,
        data_bits: u8,
        stop_bits: StopBits,
        parity: Parity,
    ) -> Result<(), DriverStatus> {
        let _op = self.track();
        self.begin(
            handle,
            HwOp::SetDataCharacteristics,
            HwCall::SetDataCharacteristics {
                data_bits,
                stop_bits,
                parity,
            },
        )
    }

    async fn set_flow_control(
        &self,
        handle: FtHandle,
        flow: FlowControl,
        xon: u8,
        xoff: u8,
    ) -> Result<(), DriverStatus> {
        let _op = self.track();
        self.begin(
            handle,
            HwOp::SetFlowControl,
            HwCall::SetFlowControl { flow, xon, xoff },
        )
    }

    async fn set_timeouts(&self, handle: FtHandle, read_ms: u32, write_ms: u32) -> Result<(), DriverStatus> {
        let _op = self.track();
        self.begin(
            handle,
            HwOp::SetTimeouts,
            HwCall::SetTimeouts { read_ms, write_ms },
        )
    }

    async fn set_latency_timer(&self, handle: FtHandle, latency_ms: u8) -> Result<(), DriverStatus> {
        let _op = self.track();
        self.begin(
            handle,
            HwOp::SetLatencyTimer,
            HwCall::SetLatencyTimer(latency_ms),
        )
    }

    async fn set_dtr(&self, handle: FtHandle, on: bool) -> Result<(), DriverStatus> {
        let _op = self.track();
        self.begin(handle, HwOp::SetDtr, HwCall::SetDtr(on))
    }

    async fn set_rts(&self, handle: FtHandle, on: bool) -> Result<(), DriverStatus> {
        let _op = self.track();
        self.begin(handle, HwOp::SetRts, HwCall::SetRts(on))
    }

    async fn purge(&self, handle: FtHandle, rx: bool, tx: bool) -> Result<(), DriverStatus> {
        let _op = self.track();
        self.begin(handle, HwOp::Purge, HwCall::Purge { rx, tx })?;
        let mut st = self.state.lock();
        if rx {
            st.rx.clear();
        }
        if tx {
            st.tx.clear();
        }
        Ok(())
    }

    async fn read_identity(&self, handle: FtHandle) -> Result<EepromIdentity, DriverStatus> {
        let _op = self.track();
        self.begin(handle, HwOp::ReadIdentity, HwCall::ReadIdentity)?;
        let st = self.state.lock();
        let index = st
            .open_handles
            .get(&handle)
            .copied()
            .ok_or(DriverStatus::InvalidHandle)?;
        st.identities
            .get(&index)
            .cloned()
            .ok_or(DriverStatus::EepromReadFailed)
    }

    async fn library_version(&self) -> Result<u32, DriverStatus> {
        let _op = self.track();
        let st = self.state.lock();
        Self::check(&st, HwOp::LibraryVersion)?;
        Ok(st.library_version)
    }

    async fn arm_event_notification(
        &self,
        handle: FtHandle,
        mask: EventMask,
    ) -> Result<Arc<Notify>, DriverStatus> {
        let _op = self.track();
        self.begin(handle, HwOp::ArmEvents, HwCall::ArmEvents(mask))?;
        let mut st = self.state.lock();
        let notifier = Arc::new(Notify::new());
        st.armed = mask;
        st.notifier = Some(notifier.clone());
        Ok(notifier)
    }

    async fn get_status(&self, handle: FtHandle) -> Result<QueueStatus, DriverStatus> {
        let _op = self.track();
        self.begin(handle, HwOp::GetStatus, HwCall::GetStatus)?;
        let mut st = self.state.lock();
        let events = std::mem::take(&mut st.pending_events);
        Ok(QueueStatus {
            rx_queued: st.rx.len() as u32,
            tx_queued: 0,
            events,
        })
    }

    async fn get_queue_status(&self, handle: FtHandle) -> Result<u32, DriverStatus> {
        let _op = self.track();
        self.begin(handle, HwOp::GetQueueStatus, HwCall::GetQueueStatus)?;
        Ok(self.state.lock().rx.len() as u32)
    }

    async fn get_modem_status(&self, handle: FtHandle) -> Result<u32, DriverStatus> {
        let _op = self.track();
        self.begin(handle, HwOp::GetModemStatus, HwCall::GetModemStatus)?;
        Ok(self.state.lock().modem_status)
    }

    async fn read(&self, handle: FtHandle, count: usize) -> Result<Vec<u8>, DriverStatus> {
        let _op = self.track();
        let gate = self.state.lock().read_gate.clone();
        if let Some(gate) = gate {
            self.read_parked.notify_one();
            gate.notified().await;
        }
        self.begin(handle, HwOp::Read, HwCall::Read(count))?;
        let mut st = self.state.lock();
        let n = count.min(st.rx.len());
        Ok(st.rx.drain(..n).collect())
    }

    async fn write(&self, handle: FtHandle, data: &[u8]) -> Result<usize, DriverStatus> {
        let _op = self.track();
        self.begin(handle, HwOp::Write, HwCall::Write(data.to_vec()))?;
        self.state.lock().tx.extend_from_slice(data);
        Ok(data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_close_tracks_handles() {
        let d = SimulatedDriver::with_ft232r();
        let h = d.open(0).await.unwrap();
        assert_eq!(d.open_handle_count(), 1);
        d.close(h).await.unwrap();
        assert_eq!(d.open_handle_count(), 0);
        assert_eq!(d.close(h).await, Err(DriverStatus::InvalidHandle));
    }

    #[tokio::test]
    async fn test_open_unknown_index() {
        let d = SimulatedDriver::new();
        assert_eq!(d.open(3).await, Err(DriverStatus::DeviceNotFound));
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let d = SimulatedDriver::with_ft232r();
        let h = d.open(0).await.unwrap();
        d.fail(HwOp::SetBaudRate, DriverStatus::InvalidBaudRate);
        assert!(d.set_baud_rate(h, 9600).await.is_err());
        d.clear_failure(HwOp::SetBaudRate);
        assert!(d.set_baud_rate(h, 9600).await.is_ok());
    }

    #[tokio::test]
    async fn test_rx_and_status() {
        let d = SimulatedDriver::with_ft232r();
        let h = d.open(0).await.unwrap();
        let notify = d
            .arm_event_notification(h, EventMask::RXCHAR | EventMask::MODEM_STATUS)
            .await
            .unwrap();

        d.inject_rx(b"abc");
        // The stored permit makes this return immediately.
        notify.notified().await;

        let status = d.get_status(h).await.unwrap();
        assert_eq!(status.rx_queued, 3);
        assert!(status.events.contains(EventMask::RXCHAR));
        // Events are consumed by the status query.
        assert!(d.get_status(h).await.unwrap().events.is_empty());

        assert_eq!(d.read(h, 2).await.unwrap(), b"ab");
        assert_eq!(d.rx_pending(), 1);
    }

    #[tokio::test]
    async fn test_calls_on_closed_handle_fail() {
        let d = SimulatedDriver::with_ft232r();
        let h = d.open(0).await.unwrap();
        d.close(h).await.unwrap();
        assert_eq!(d.write(h, b"x").await, Err(DriverStatus::InvalidHandle));
        assert_eq!(d.get_status(h).await, Err(DriverStatus::InvalidHandle));
    }

    #[tokio::test]
    async fn test_held_read_counts_as_in_flight() {
        let d = SimulatedDriver::with_ft232r();
        let h = d.open(0).await.unwrap();
        d.inject_rx(b"abc");
        d.pause_reads();

        let reader = {
            let d = d.clone();
            tokio::spawn(async move { d.read(h, 3).await })
        };
        d.read_held().await;
        assert!(!d.calls().contains(&HwCall::Read(3)));

        // A second call while the read is held overlaps it.
        d.get_queue_status(h).await.unwrap();
        assert_eq!(d.max_in_flight(), 2);

        d.resume_reads();
        assert_eq!(reader.await.unwrap().unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_purge_clears_queues() {
        let d = SimulatedDriver::with_ft232r();
        let h = d.open(0).await.unwrap();
        d.inject_rx(b"junk");
        d.write(h, b"out").await.unwrap();
        d.purge(h, true, true).await.unwrap();
        assert_eq!(d.rx_pending(), 0);
        assert!(d.drain_tx().is_empty());
        assert_eq!(d.purge_count(), 1);
    }
}
