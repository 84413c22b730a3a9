// Odometry encoder: one CSV row per saved frame with the flattened 4x4 pose

use std::path::Path;

use super::csv::{join_values, CsvFile};
use super::{EncoderError, EncoderFault, EncoderStatus, FailureTally, Result, StreamEncoder};
use crate::capture::Pose;

pub const ODOMETRY_HEADER: &str = "timestamp, frame, m00, m01, m02, m03, m10, m11, m12, m13, \
                                   m20, m21, m22, m23, m30, m31, m32, m33";

/// Pose of one saved frame
#[derive(Debug, Clone, Copy)]
pub struct PoseRecord {
    pub timestamp: f64,
    pub pose: Pose,
}

pub struct OdometryEncoder {
    csv: CsvFile,
    tally: FailureTally,
}

impl OdometryEncoder {
    pub fn create(path: &Path) -> Result<Self> {
        Ok(Self {
            csv: CsvFile::create(path, ODOMETRY_HEADER)?,
            tally: FailureTally::default(),
        })
    }

    pub fn rows(&self) -> usize {
        self.csv.rows()
    }
}

impl StreamEncoder for OdometryEncoder {
    type Input = PoseRecord;

    fn name(&self) -> &'static str {
        "odometry"
    }

    fn encode(&mut self, sequence: usize, record: &PoseRecord) -> Result<()> {
        let line = format!(
            "{}, {}, {}",
            record.timestamp,
            sequence,
            join_values(record.pose.flattened())
        );
        self.csv.write_row(&line).inspect_err(|e| {
            if !matches!(e, EncoderError::Closed) {
                self.tally.recoverable("odometry", EncoderFault::RowWrite, e);
            }
        })
    }

    fn status(&self) -> EncoderStatus {
        self.tally.status
    }

    fn close(&mut self) -> Result<()> {
        self.tally.summarize("odometry");
        self.csv.close().inspect_err(|e| {
            self.tally.fatal("odometry", EncoderFault::RowWrite, e);
        })?;
        log::debug!("Odometry closed: {:?} ({} rows)", self.csv.path(), self.csv.rows());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_odometry_rows_have_eighteen_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("odometry.csv");
        let mut encoder = OdometryEncoder::create(&path).unwrap();

        let mut pose = Pose::identity();
        pose.matrix[0][3] = 1.5;
        encoder.encode(0, &PoseRecord { timestamp: 10.25, pose }).unwrap();
        encoder.encode(1, &PoseRecord { timestamp: 10.5, pose: Pose::identity() }).unwrap();
        encoder.close().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].split(", ").count(), 18);
        assert!(lines[1].starts_with("10.25, 0, 1, 0, 0, 1.5, 0, 1"));
        let fields: Vec<&str> = lines[2].split(", ").collect();
        assert_eq!(fields.len(), 18);
        assert_eq!(fields[1], "1");
        assert_eq!(encoder.status(), EncoderStatus::Ok);
    }
}
