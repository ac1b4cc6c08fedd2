pub mod encoder;
pub mod engine;
pub mod types;

pub use engine::{RecordingEngine, RecordingStatus};
pub use types::{RecordingOptions, RecordingState, StopOutcome};
