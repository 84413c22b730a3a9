// Session metadata structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::encoding::SessionStatus;

/// Record emitted to the metadata store for every successful session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    /// Unique session ID
    pub id: String,

    /// Stop time minus start time, in seconds
    pub duration_secs: f64,

    /// When the session was started
    pub created_at: DateTime<Utc>,

    /// Human-readable ordinal name, e.g. "Recording 3"
    pub name: String,

    /// RGB output relative to the storage root (directory or container file)
    pub rgb_file_path: PathBuf,

    /// Depth directory relative to the storage root
    pub depth_file_path: PathBuf,
}

/// Ordinal session name from the number of sessions already in the store
pub fn ordinal_name(prior_sessions: usize) -> String {
    format!("Recording {}", prior_sessions)
}

/// Frame and row counters reported in the manifest
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCounts {
    /// Frames delivered by the source
    pub raw_frames: usize,
    /// Frames dispatched after decimation
    pub saved_frames: usize,
    /// Merged inertial rows
    pub imu_rows: usize,
}

/// `session.json`, written into every session directory at finish.
///
/// Makes a directory self-describing so it can be re-indexed if the metadata
/// store never received its descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionManifest {
    pub id: String,
    pub label: String,
    pub attempt: u32,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub fps_divider: u32,
    pub counts: SessionCounts,
    /// Artifact paths relative to the storage root
    pub rgb_path: PathBuf,
    pub depth_path: PathBuf,
    pub confidence_path: PathBuf,
    pub camera_matrix_path: PathBuf,
    pub odometry_path: PathBuf,
    pub imu_path: PathBuf,
}

impl SessionManifest {
    /// Descriptor for this manifest, named after the given prior-session count
    pub fn descriptor(&self, prior_sessions: usize) -> SessionDescriptor {
        SessionDescriptor {
            id: self.id.clone(),
            duration_secs: self.duration_secs,
            created_at: self.created_at,
            name: ordinal_name(prior_sessions),
            rgb_file_path: self.rgb_path.clone(),
            depth_file_path: self.depth_path.clone(),
        }
    }
}
