// Recording modules

pub mod dataset;
pub mod inertial;
pub mod phase;
pub mod queue;
pub mod recorder;
pub mod tone;

pub use dataset::{DatasetSession, SessionError, SessionSettings};
pub use phase::{Phase, PhaseSequencer, PhaseState, PhaseStep};
pub use recorder::{FinishedCallback, Recorder, RecorderError, SessionOutcome};
pub use tone::{SilentTonePlayer, TonePlayer};

#[cfg(feature = "audio")]
pub use tone::SineTonePlayer;

use serde::{Deserialize, Serialize};

/// Current recording state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RecordingStatus {
    /// Ready to record
    Idle,
    /// A session is capturing
    Recording,
    /// Draining encoders and saving metadata
    Finalizing,
}

impl RecordingStatus {
    /// Check if the system is ready to start recording
    pub fn can_start_recording(&self) -> bool {
        *self == RecordingStatus::Idle
    }
}

impl Default for RecordingStatus {
    fn default() -> Self {
        Self::Idle
    }
}
