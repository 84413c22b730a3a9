// Stream encoders and their failure status
//
// Each encoder owns one output target (a file or a directory of per-frame files)
// and a local `EncoderStatus`. The coordinator folds those into a single
// `SessionStatus` with `combine`.
//
// To add a new stream:
// 1. Add a fault variant to `EncoderFault` if it fails in a new way
// 2. Implement `StreamEncoder` for it
// 3. Wire it into `recording::dataset::FrameEncoders`
// 4. Add its artifact path to `session::storage::SessionLayout`

pub mod confidence;
mod csv;
pub mod depth;
pub mod imu;
pub mod odometry;
pub mod rgb;
pub mod video;

pub use confidence::ConfidenceEncoder;
pub use depth::DepthEncoder;
pub use imu::ImuEncoder;
pub use odometry::{OdometryEncoder, PoseRecord};
pub use rgb::RgbEncoder;
pub use video::{open_video_sink, SinkState, VideoSink};

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Error type for encoder operations
#[derive(Debug, thiserror::Error)]
pub enum EncoderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("PNG error: {0}")]
    Png(#[from] png::EncodingError),

    #[error("Sink error: {0}")]
    Sink(String),

    #[error("Encoder not available: {0}")]
    NotAvailable(String),

    #[error("Malformed input: {0}")]
    InvalidInput(String),

    #[error("Encoder already closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, EncoderError>;

/// What went wrong inside a single encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncoderFault {
    /// RGB image or container write failed
    VideoEncoding,
    /// Depth frame write failed
    FrameEncoding,
    /// Confidence frame write failed
    ConfidenceEncoding,
    /// CSV row write failed (odometry, imu)
    RowWrite,
    /// Output directory could not be created
    DirectoryCreation,
}

/// Per-encoder tri-state status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "fault")]
pub enum EncoderStatus {
    #[default]
    Ok,
    /// Some units were lost but the encoder keeps accepting input
    Recoverable(EncoderFault),
    /// The encoder stopped writing
    Fatal(EncoderFault),
}

impl EncoderStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, EncoderStatus::Ok)
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, EncoderStatus::Fatal(_))
    }

    fn severity(&self) -> u8 {
        match self {
            EncoderStatus::Ok => 0,
            EncoderStatus::Recoverable(_) => 1,
            EncoderStatus::Fatal(_) => 2,
        }
    }

    /// Keep the worse of the two; on a tie the earlier fault stays
    pub fn escalate(self, new: EncoderStatus) -> EncoderStatus {
        if new.severity() > self.severity() {
            new
        } else {
            self
        }
    }
}

/// Aggregated outcome of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    AllGood,
    EncodingError,
    DirectoryCreationError,
}

impl SessionStatus {
    fn rank(&self) -> u8 {
        match self {
            SessionStatus::AllGood => 0,
            SessionStatus::EncodingError => 1,
            SessionStatus::DirectoryCreationError => 2,
        }
    }

    pub fn is_all_good(&self) -> bool {
        *self == SessionStatus::AllGood
    }
}

impl From<EncoderStatus> for SessionStatus {
    fn from(status: EncoderStatus) -> Self {
        match status {
            EncoderStatus::Ok => SessionStatus::AllGood,
            EncoderStatus::Recoverable(EncoderFault::DirectoryCreation)
            | EncoderStatus::Fatal(EncoderFault::DirectoryCreation) => {
                SessionStatus::DirectoryCreationError
            }
            EncoderStatus::Recoverable(_) | EncoderStatus::Fatal(_) => SessionStatus::EncodingError,
        }
    }
}

/// Precedence: directory creation error > encoding error > all good.
/// The existing status wins ties, so the first non-ok status is kept.
pub fn combine(existing: SessionStatus, new: SessionStatus) -> SessionStatus {
    if new.rank() > existing.rank() {
        new
    } else {
        existing
    }
}

/// Capability set shared by all stream encoders
pub trait StreamEncoder {
    type Input: ?Sized;

    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Write one unit (frame or row). `sequence` is the saved-frame index, or the
    /// row number for sample streams.
    fn encode(&mut self, sequence: usize, input: &Self::Input) -> Result<()>;

    fn status(&self) -> EncoderStatus;

    /// Flush and close the output. Safe to call more than once.
    fn close(&mut self) -> Result<()>;
}

/// Failure bookkeeping shared by the encoders.
///
/// Logs the first failure in full, then only counts; `close()` reports the total.
#[derive(Debug, Default)]
pub(crate) struct FailureTally {
    pub status: EncoderStatus,
    pub failures: u32,
}

impl FailureTally {
    pub fn recoverable(&mut self, encoder: &str, fault: EncoderFault, error: &EncoderError) {
        self.record(encoder, EncoderStatus::Recoverable(fault), error);
    }

    pub fn fatal(&mut self, encoder: &str, fault: EncoderFault, error: &EncoderError) {
        self.record(encoder, EncoderStatus::Fatal(fault), error);
    }

    fn record(&mut self, encoder: &str, status: EncoderStatus, error: &EncoderError) {
        self.failures += 1;
        self.status = self.status.escalate(status);
        if self.failures == 1 {
            log::error!("{} encoder write failed: {}", encoder, error);
        }
    }

    pub fn summarize(&self, encoder: &str) {
        if self.failures > 0 {
            log::warn!("{} encoder had {} write errors", encoder, self.failures);
        }
    }
}

/// Zero-padded per-frame file name, e.g. `000042.png`
pub fn frame_file_name(sequence: usize, extension: &str) -> String {
    format!("{:06}.{}", sequence, extension)
}

/// Write a single-channel or RGB PNG. 16-bit data must already be big-endian.
pub(crate) fn write_png(
    path: &Path,
    width: u32,
    height: u32,
    color: png::ColorType,
    depth: png::BitDepth,
    data: &[u8],
) -> Result<()> {
    let file = File::create(path)?;
    let mut encoder = png::Encoder::new(BufWriter::new(file), width, height);
    encoder.set_color(color);
    encoder.set_depth(depth);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(data)?;
    writer.finish()?;
    Ok(())
}
