//! Event bus between the session actor and the transport.
//!
//! Both control channels are rendezvous channels (capacity zero): a door
//! signal send blocks until the session takes it, and a delta send blocks
//! until the transport takes it.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::time::Duration;

use crate::session::{DoorState, SessionChannels};

/// Transport-side handle for sending door signals (`true` = open).
#[derive(Clone, Debug)]
pub struct DoorSignalSender(SyncSender<bool>);

impl DoorSignalSender {
    /// Send a door signal, blocking until the session receives it.
    pub fn send(&self, state: DoorState) -> Result<()> {
        self.0
            .send(state.is_open())
            .map_err(|_| anyhow!("inference session is not running"))
    }
}

/// Transport-side handle for receiving serialized delta arrays.
#[derive(Debug)]
pub struct DeltaReceiver(Receiver<Vec<u8>>);

impl DeltaReceiver {
    pub fn recv(&self) -> Result<Vec<u8>> {
        self.0
            .recv()
            .map_err(|_| anyhow!("inference session stopped"))
    }

    /// Wait up to `timeout`. `Ok(None)` means nothing arrived in time.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        match self.0.recv_timeout(timeout) {
            Ok(delta) => Ok(Some(delta)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(anyhow!("inference session stopped")),
        }
    }
}

/// Both ends of the door-signal and delta-result channels.
pub struct EventBus {
    pub door_signals: DoorSignalSender,
    pub deltas: DeltaReceiver,
    pub session: SessionChannels,
}

impl EventBus {
    pub fn new() -> Self {
        let (door_tx, door_rx) = mpsc::sync_channel(0);
        let (delta_tx, delta_rx) = mpsc::sync_channel(0);
        Self {
            door_signals: DoorSignalSender(door_tx),
            deltas: DeltaReceiver(delta_rx),
            session: SessionChannels::new(door_rx, delta_tx),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Transport-side record of whether the door is open.
///
/// Starts closed. Opening is a single atomic check-and-set so two overlapping
/// open commands cannot both trigger a baseline.
#[derive(Debug, Default)]
pub struct DoorLatch {
    open: AtomicBool,
}

impl DoorLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the door open. Returns `false` if it already was.
    pub fn try_open(&self) -> bool {
        !self.open.swap(true, Ordering::SeqCst)
    }

    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn latch_opens_once_until_closed() {
        let latch = DoorLatch::new();
        assert!(!latch.is_open());
        assert!(latch.try_open());
        assert!(!latch.try_open());
        latch.close();
        assert!(latch.try_open());
    }

    #[test]
    fn concurrent_opens_trigger_exactly_once() {
        let latch = Arc::new(DoorLatch::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let latch = latch.clone();
                std::thread::spawn(move || latch.try_open())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|opened| *opened)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn send_fails_once_session_is_gone() {
        let bus = EventBus::new();
        drop(bus.session);
        assert!(bus.door_signals.send(DoorState::Open).is_err());
        assert!(bus.deltas.recv().is_err());
    }
}
