// Session folder management: directory layout, camera matrix, manifest scan

use super::{MetadataStore, SessionManifest};
use crate::capture::Intrinsics;
use crate::config::RgbOutput;
use crate::encoding::SessionStatus;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const RGB_FRAMES_DIR: &str = "rgb_frames";
pub const RGB_VIDEO_FILE: &str = "rgb.mp4";
pub const DEPTH_DIR: &str = "depth";
pub const CONFIDENCE_DIR: &str = "confidence";
pub const CAMERA_MATRIX_FILE: &str = "camera_matrix.csv";
pub const ODOMETRY_FILE: &str = "odometry.csv";
pub const IMU_FILE: &str = "imu.csv";
pub const MANIFEST_FILE: &str = "session.json";

/// Where one session's artifacts live: `<storage>/attempt_<N>/<label>/`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLayout {
    storage_root: PathBuf,
    relative_dir: PathBuf,
    rgb_output: RgbOutput,
}

impl SessionLayout {
    pub fn new(storage_root: &Path, attempt: u32, label: &str, rgb_output: RgbOutput) -> Self {
        Self {
            storage_root: storage_root.to_path_buf(),
            relative_dir: Path::new(&attempt_dir_name(attempt)).join(label),
            rgb_output,
        }
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    pub fn rgb_output(&self) -> RgbOutput {
        self.rgb_output
    }

    /// Absolute session directory
    pub fn dir(&self) -> PathBuf {
        self.storage_root.join(&self.relative_dir)
    }

    /// Resolve a path relative to the storage root
    pub fn absolute(&self, relative: &Path) -> PathBuf {
        self.storage_root.join(relative)
    }

    // Paths relative to the storage root, as recorded in descriptors and manifests

    pub fn rgb(&self) -> PathBuf {
        match self.rgb_output {
            RgbOutput::PngFrames => self.relative_dir.join(RGB_FRAMES_DIR),
            RgbOutput::Video => self.relative_dir.join(RGB_VIDEO_FILE),
        }
    }

    pub fn depth(&self) -> PathBuf {
        self.relative_dir.join(DEPTH_DIR)
    }

    pub fn confidence(&self) -> PathBuf {
        self.relative_dir.join(CONFIDENCE_DIR)
    }

    pub fn camera_matrix(&self) -> PathBuf {
        self.relative_dir.join(CAMERA_MATRIX_FILE)
    }

    pub fn odometry(&self) -> PathBuf {
        self.relative_dir.join(ODOMETRY_FILE)
    }

    pub fn imu(&self) -> PathBuf {
        self.relative_dir.join(IMU_FILE)
    }

    pub fn manifest(&self) -> PathBuf {
        self.relative_dir.join(MANIFEST_FILE)
    }

    /// Create the session directory and its per-frame subdirectories.
    /// Existing directories are reused.
    pub fn create_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.dir())?;
        if self.rgb_output == RgbOutput::PngFrames {
            std::fs::create_dir_all(self.absolute(&self.rgb()))?;
        }
        std::fs::create_dir_all(self.absolute(&self.depth()))?;
        std::fs::create_dir_all(self.absolute(&self.confidence()))?;
        Ok(())
    }

    /// Manifest left in this directory by an earlier session, if any
    pub fn previous_manifest(&self) -> Option<SessionManifest> {
        let path = self.absolute(&self.manifest());
        if !path.exists() {
            return None;
        }
        match read_manifest(&path) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                log::warn!("Unreadable manifest {:?}: {}", path, e);
                None
            }
        }
    }
}

pub fn attempt_dir_name(attempt: u32) -> String {
    format!("attempt_{}", attempt)
}

/// Write the intrinsics as 3 lines of `x, y, z`, one per row of the matrix
pub fn write_camera_matrix(path: &Path, intrinsics: &Intrinsics) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    for row in intrinsics.transposed_columns() {
        writeln!(file, "{}, {}, {}", row[0], row[1], row[2])?;
    }
    file.sync_all()
}

/// Parse a `camera_matrix.csv` back into its 3 rows
pub fn read_camera_matrix(path: &Path) -> anyhow::Result<[[f64; 3]; 3]> {
    let contents = std::fs::read_to_string(path)?;
    let mut rows = [[0.0; 3]; 3];
    let mut count = 0;

    for (i, line) in contents.lines().filter(|l| !l.trim().is_empty()).enumerate() {
        if i >= 3 {
            return Err(anyhow::anyhow!("camera matrix has more than 3 rows"));
        }
        let values: Vec<f64> = line
            .split(',')
            .map(|v| v.trim().parse::<f64>())
            .collect::<Result<_, _>>()?;
        if values.len() != 3 {
            return Err(anyhow::anyhow!("camera matrix row {} has {} values", i, values.len()));
        }
        rows[i].copy_from_slice(&values);
        count += 1;
    }

    if count != 3 {
        return Err(anyhow::anyhow!("camera matrix has {} rows, expected 3", count));
    }
    Ok(rows)
}

pub fn write_manifest(path: &Path, manifest: &SessionManifest) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(manifest)?;
    std::fs::write(path, json)?;
    Ok(())
}

pub fn read_manifest(path: &Path) -> anyhow::Result<SessionManifest> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Find every `attempt_*/*/session.json` under the storage root.
/// Unreadable manifests are logged and skipped.
pub fn scan_manifests(storage_root: &Path) -> anyhow::Result<Vec<SessionManifest>> {
    let mut manifests = Vec::new();
    if !storage_root.exists() {
        return Ok(manifests);
    }

    for attempt in std::fs::read_dir(storage_root)?.flatten() {
        let attempt_path = attempt.path();
        let is_attempt = attempt_path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with("attempt_"))
            .unwrap_or(false);
        if !is_attempt || !attempt_path.is_dir() {
            continue;
        }

        for session in std::fs::read_dir(&attempt_path)?.flatten() {
            let manifest_path = session.path().join(MANIFEST_FILE);
            if !manifest_path.is_file() {
                continue;
            }
            match read_manifest(&manifest_path) {
                Ok(manifest) => manifests.push(manifest),
                Err(e) => log::warn!("Skipping unreadable manifest {:?}: {}", manifest_path, e),
            }
        }
    }

    manifests.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(manifests)
}

/// Save descriptors for successful sessions the store does not know about.
///
/// Recovers directories left behind when a metadata save failed. Returns how
/// many sessions were added.
pub fn reindex_orphans(storage_root: &Path, store: &dyn MetadataStore) -> anyhow::Result<usize> {
    let mut added = 0;
    for manifest in scan_manifests(storage_root)? {
        if manifest.status != SessionStatus::AllGood || store.session_exists(&manifest.id)? {
            continue;
        }
        let descriptor = manifest.descriptor(store.count_sessions()?);
        store.save_session(&descriptor)?;
        log::info!("Re-indexed orphaned session {} ({})", descriptor.name, manifest.label);
        added += 1;
    }
    Ok(added)
}
