//! Door-cycle session actor.
//!
//! The session is a two-state automaton driven by door signals:
//!
//! - `Open`: re-count the current frame as the cycle's baseline. The frame
//!   cursor does not move.
//! - `Closed`: advance the cursor, count the new frame as the final snapshot,
//!   diff it against the baseline and emit the SKU deltas (when non-empty).
//!
//! The session starts in `Open` and takes one baseline before any signal
//! arrives. A cycle's baseline is therefore taken on the same frame as the
//! previous cycle's final snapshot, and consecutive frames are compared.
//!
//! # Scheduling
//!
//! Door signals always take priority over live-view republishing: the loop
//! blocks on the signal channel for at most `republish_interval`, and only
//! republishes the current frame when that wait times out. Publishing to the
//! live view never blocks.

use anyhow::{anyhow, Result};
use image::RgbImage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::time::Duration;

use crate::aggregate::{Aggregator, LabelCount, LabelTable};
use crate::delta::{compute_delta, SkuDelta, SkuMapping};
use crate::detect::{Detections, Detector};
use crate::frame::{FrameRef, FrameSource};
use crate::live::LiveView;

pub const DEFAULT_REPUBLISH_INTERVAL: Duration = Duration::from_millis(100);

/// Logical door state. Signals on the bus are booleans, `true` meaning open.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DoorState {
    Open,
    Closed,
}

impl DoorState {
    pub fn from_signal(open: bool) -> Self {
        if open {
            DoorState::Open
        } else {
            DoorState::Closed
        }
    }

    pub fn is_open(self) -> bool {
        matches!(self, DoorState::Open)
    }
}

/// Session settings, fixed for the lifetime of the session.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub confidence_threshold: f32,
    pub labels: LabelTable,
    pub sku_mapping: SkuMapping,
    pub republish_interval: Duration,
}

impl SessionConfig {
    pub fn new(confidence_threshold: f32, sku_mapping: SkuMapping) -> Self {
        Self {
            confidence_threshold,
            labels: LabelTable::default(),
            sku_mapping,
            republish_interval: DEFAULT_REPUBLISH_INTERVAL,
        }
    }
}

/// Session side of the event bus plus optional collaborators.
pub struct SessionChannels {
    door_signals: Receiver<bool>,
    deltas: SyncSender<Vec<u8>>,
    live: Option<LiveView>,
    shutdown: Option<Arc<AtomicBool>>,
}

impl SessionChannels {
    pub fn new(door_signals: Receiver<bool>, deltas: SyncSender<Vec<u8>>) -> Self {
        Self {
            door_signals,
            deltas,
            live: None,
            shutdown: None,
        }
    }

    /// Republish annotated frames to `live`.
    pub fn with_live_view(mut self, live: LiveView) -> Self {
        self.live = Some(live);
        self
    }

    /// Stop the session once `flag` is set. Without a flag the session runs
    /// until the door-signal channel closes.
    pub fn with_shutdown(mut self, flag: Arc<AtomicBool>) -> Self {
        self.shutdown = Some(flag);
        self
    }

    #[cfg(test)]
    pub(crate) fn into_parts(self) -> (Receiver<bool>, SyncSender<Vec<u8>>) {
        (self.door_signals, self.deltas)
    }

    fn shutdown_requested(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }
}

/// Door-cycle session. Sole owner of the frame cursor and both snapshots.
pub struct Session<D: Detector> {
    config: SessionConfig,
    frames: FrameSource,
    detector: D,
    aggregator: Aggregator,
    state: DoorState,
    baseline: LabelCount,
    cycles: u64,
}

impl<D: Detector> Session<D> {
    pub fn new(config: SessionConfig, frames: FrameSource, detector: D) -> Self {
        let aggregator = Aggregator::new(config.confidence_threshold, config.labels.clone());
        Self {
            config,
            frames,
            detector,
            aggregator,
            state: DoorState::Open,
            baseline: LabelCount::new(),
            cycles: 0,
        }
    }

    pub fn state(&self) -> DoorState {
        self.state
    }

    pub fn baseline(&self) -> &LabelCount {
        &self.baseline
    }

    pub fn cursor(&self) -> usize {
        self.frames.position()
    }

    pub fn current_frame(&self) -> &FrameRef {
        self.frames.current()
    }

    /// Completed door cycles.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Run the session until the door-signal channel closes or shutdown is
    /// requested.
    ///
    /// Returns an error only when a detection cannot be mapped to a label.
    pub fn run(mut self, channels: SessionChannels) -> Result<()> {
        log::info!(
            "session starting with detector '{}' on {} frames (threshold {}), door {:?}",
            self.detector.name(),
            self.frames.len(),
            self.config.confidence_threshold,
            self.state()
        );

        // The door is assumed open at startup: take a baseline right away.
        let frame = self.capture_baseline()?;
        publish_frame(&channels, frame);

        loop {
            if channels.shutdown_requested() {
                log::info!("session shutting down after {} cycles", self.cycles);
                return Ok(());
            }
            match channels
                .door_signals
                .recv_timeout(self.config.republish_interval)
            {
                Ok(signal) => {
                    let (deltas, frame) = self.handle_signal(DoorState::from_signal(signal))?;
                    publish_frame(&channels, frame);
                    if let Some(deltas) = deltas {
                        if let Err(err) = emit_deltas(&channels.deltas, &deltas) {
                            log::warn!("{}", err);
                            return Ok(());
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if let Some(live) = &channels.live {
                        if let Err(err) = live.republish() {
                            log::warn!("live view republish failed: {}", err);
                        }
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    log::info!("door signal channel closed after {} cycles", self.cycles);
                    return Ok(());
                }
            }
        }
    }

    /// Apply one door signal.
    ///
    /// Returns the non-empty deltas produced by a `Closed` signal, and the
    /// annotated frame when the detector produced one.
    pub fn handle_signal(
        &mut self,
        signal: DoorState,
    ) -> Result<(Option<Vec<SkuDelta>>, Option<RgbImage>)> {
        self.state = signal;
        match signal {
            DoorState::Open => {
                log::info!("door is open");
                let frame = self.capture_baseline()?;
                Ok((None, frame))
            }
            DoorState::Closed => {
                log::info!("door is closed");
                self.frames.advance();
                let (final_count, frame) = self.capture()?;
                let deltas = compute_delta(&self.baseline, &final_count, &self.config.sku_mapping);
                self.cycles += 1;
                log::info!("cycle {} delta: {:?}", self.cycles, deltas);
                let deltas = (!deltas.is_empty()).then_some(deltas);
                Ok((deltas, frame))
            }
        }
    }

    fn capture_baseline(&mut self) -> Result<Option<RgbImage>> {
        self.baseline = LabelCount::new();
        let (counts, frame) = self.capture()?;
        self.baseline = counts;
        Ok(frame)
    }

    fn capture(&mut self) -> Result<(LabelCount, Option<RgbImage>)> {
        let frame = self.current_frame().clone();
        let Detections { records, mut image } = match self.detector.detect(&frame) {
            Ok(detections) => detections,
            Err(err) => {
                log::warn!("detection failed for {}: {:#}; counting nothing", frame, err);
                Detections::default()
            }
        };
        let counts = self.aggregator.count_annotated(&records, image.as_mut())?;
        log::debug!("frame {} counts {:?}", frame, counts);
        Ok((counts, image))
    }
}

fn publish_frame(channels: &SessionChannels, frame: Option<RgbImage>) {
    if let (Some(live), Some(frame)) = (&channels.live, frame) {
        if let Err(err) = live.publish(&frame) {
            log::warn!("live view publish failed: {}", err);
        }
    }
}

/// Serialize and hand the deltas to the transport, blocking until taken.
///
/// A serialization failure drops this cycle's result.
fn emit_deltas(deltas_tx: &SyncSender<Vec<u8>>, deltas: &[SkuDelta]) -> Result<()> {
    let payload = match serde_json::to_vec(deltas) {
        Ok(payload) => payload,
        Err(err) => {
            log::warn!("dropping delta result, serialization failed: {}", err);
            return Ok(());
        }
    };
    deltas_tx
        .send(payload)
        .map_err(|_| anyhow!("delta consumer went away; stopping session"))
}
