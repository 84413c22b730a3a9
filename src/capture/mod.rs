// Frame source adapter: decoded camera frames and raw motion samples
//
// Capture itself (camera session, depth sensor, motion manager) happens outside
// this crate. Sources hand already-decoded frames and samples to a `CaptureSink`.

pub mod synthetic;

pub use synthetic::{SyntheticConfig, SyntheticSource};

use serde::{Deserialize, Serialize};

/// Packed 8-bit RGB image, row-major, `width * height * 3` bytes
#[derive(Debug, Clone)]
pub struct RgbImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl RgbImage {
    pub fn is_well_formed(&self) -> bool {
        self.data.len() == self.width as usize * self.height as usize * 3
    }
}

/// Depth map in metres, row-major
#[derive(Debug, Clone)]
pub struct DepthMap {
    pub width: u32,
    pub height: u32,
    pub data: Vec<f32>,
}

impl DepthMap {
    pub fn is_well_formed(&self) -> bool {
        self.data.len() == self.width as usize * self.height as usize
    }
}

/// Per-pixel depth confidence (0 = low, 1 = medium, 2 = high), row-major
#[derive(Debug, Clone)]
pub struct ConfidenceMap {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl ConfidenceMap {
    pub fn is_well_formed(&self) -> bool {
        self.data.len() == self.width as usize * self.height as usize
    }
}

/// Camera-to-world transform, stored row-major
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub matrix: [[f64; 4]; 4],
}

impl Pose {
    pub fn identity() -> Self {
        let mut matrix = [[0.0; 4]; 4];
        for (i, row) in matrix.iter_mut().enumerate() {
            row[i] = 1.0;
        }
        Self { matrix }
    }

    /// The 16 matrix entries in row-major order
    pub fn flattened(&self) -> impl Iterator<Item = f64> + '_ {
        self.matrix.iter().flat_map(|row| row.iter().copied())
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

/// Camera intrinsics, stored column-major (as delivered by the AR runtime).
///
/// `columns[0]` is `(fx, 0, 0)`, `columns[1]` is `(0, fy, 0)`, `columns[2]` is `(cx, cy, 1)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intrinsics {
    pub columns: [[f64; 3]; 3],
}

impl Intrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self {
            columns: [[fx, 0.0, 0.0], [0.0, fy, 0.0], [cx, cy, 1.0]],
        }
    }

    /// Columns of the transposed matrix, i.e. the rows of the intrinsics matrix
    pub fn transposed_columns(&self) -> [[f64; 3]; 3] {
        let c = &self.columns;
        [
            [c[0][0], c[1][0], c[2][0]],
            [c[0][1], c[1][1], c[2][1]],
            [c[0][2], c[1][2], c[2][2]],
        ]
    }
}

/// One camera frame with everything the AR runtime attached to it
#[derive(Debug, Clone)]
pub struct Frame {
    /// Monotonic capture time in seconds (relative to device boot)
    pub timestamp: f64,
    pub image: RgbImage,
    /// Absent while the depth sensor warms up
    pub depth: Option<DepthMap>,
    /// Only meaningful when `depth` is present
    pub confidence: Option<ConfidenceMap>,
    pub pose: Pose,
    pub intrinsics: Intrinsics,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InertialKind {
    /// Accelerometer, in g
    LinearAcceleration,
    /// Gyroscope, in rad/s
    AngularRate,
}

/// A single raw accelerometer or gyroscope reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InertialSample {
    pub kind: InertialKind,
    pub value: Vec3,
    pub timestamp: f64,
}

impl InertialSample {
    pub fn linear(value: Vec3, timestamp: f64) -> Self {
        Self { kind: InertialKind::LinearAcceleration, value, timestamp }
    }

    pub fn angular(value: Vec3, timestamp: f64) -> Self {
        Self { kind: InertialKind::AngularRate, value, timestamp }
    }
}

/// A linear + angular pair written as one `imu.csv` row
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergedInertialSample {
    pub timestamp: f64,
    pub linear: Vec3,
    pub angular: Vec3,
}

/// Receiver of capture callbacks.
///
/// Each callback may be invoked from its own thread; implementations must return
/// quickly and never block the capture path.
pub trait CaptureSink: Send + Sync {
    fn on_frame(&self, frame: Frame);
    fn on_accelerometer(&self, value: Vec3, timestamp: f64);
    fn on_gyroscope(&self, value: Vec3, timestamp: f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transposed_columns_are_matrix_rows() {
        let k = Intrinsics::new(1500.0, 1490.0, 960.0, 720.0);
        let rows = k.transposed_columns();
        assert_eq!(rows[0], [1500.0, 0.0, 960.0]);
        assert_eq!(rows[1], [0.0, 1490.0, 720.0]);
        assert_eq!(rows[2], [0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_pose_flattened_is_row_major() {
        let mut pose = Pose::identity();
        pose.matrix[0][3] = 0.5;
        pose.matrix[2][1] = -2.0;
        let flat: Vec<f64> = pose.flattened().collect();
        assert_eq!(flat.len(), 16);
        assert_eq!(flat[3], 0.5);
        assert_eq!(flat[9], -2.0);
        assert_eq!(flat[15], 1.0);
    }
}
