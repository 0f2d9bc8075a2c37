mod backend;
mod backends;
mod result;

pub use backend::Detector;
pub use backends::{DetectionHistory, StubDetector};
#[cfg(feature = "backend-tract")]
pub use backends::TractDetector;
pub use result::{DetectionRecord, Detections, RECORD_STRIDE};
