//! Vending inference service.
//!
//! This crate watches a vending enclosure through a product detector and turns
//! every "door open → door closed" cycle into per-SKU quantity deltas.
//!
//! # Architecture
//!
//! The session actor owns all mutable cycle state:
//!
//! 1. **Baseline on open**: the current frame is counted when the door opens
//!    (and once at startup, before any door event).
//! 2. **Final on close**: the frame cursor advances, the new frame is counted,
//!    and the delta against the baseline is emitted.
//! 3. **Control first**: a pending door signal always wins over live-view
//!    republishing.
//!
//! # Module Structure
//!
//! - `frame`: cyclic frame source (fixed ring of frame paths)
//! - `detect`: detector trait, raw detection records, backends
//! - `aggregate`: confidence filtering and per-label counting
//! - `overlay`: bounding-box drawing for the live view
//! - `delta`: label counts → SKU deltas
//! - `session`: the door-cycle state machine
//! - `bus`: rendezvous channels between the session and the transport
//! - `transport`: command-topic protocol and MQTT bridge
//! - `live`: latest-frame slot and MJPEG server
//! - `config`: file/env configuration

pub mod aggregate;
pub mod bus;
pub mod config;
pub mod delta;
pub mod detect;
pub mod frame;
pub mod live;
pub mod overlay;
pub mod session;
pub mod transport;

pub use aggregate::{Aggregator, LabelCount, LabelTable};
pub use bus::{DoorLatch, EventBus};
pub use delta::{compute_delta, SkuDelta, SkuMapping};
pub use detect::{DetectionRecord, Detections, Detector, StubDetector};
pub use frame::{FrameRef, FrameSource};
pub use live::{LiveServer, LiveServerHandle, LiveView};
pub use session::{DoorState, Session, SessionChannels, SessionConfig};
