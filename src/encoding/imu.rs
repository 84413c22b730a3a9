// Inertial encoder: one CSV row per merged accelerometer + gyroscope pair

use std::path::Path;

use super::csv::{join_values, CsvFile};
use super::{EncoderError, EncoderFault, EncoderStatus, FailureTally, Result, StreamEncoder};
use crate::capture::MergedInertialSample;

pub const IMU_HEADER: &str = "timestamp, a_x, a_y, a_z, alpha_x, alpha_y, alpha_z";

pub struct ImuEncoder {
    csv: CsvFile,
    tally: FailureTally,
}

impl ImuEncoder {
    pub fn create(path: &Path) -> Result<Self> {
        Ok(Self {
            csv: CsvFile::create(path, IMU_HEADER)?,
            tally: FailureTally::default(),
        })
    }

    pub fn rows(&self) -> usize {
        self.csv.rows()
    }

    /// Flush and close the file
    pub fn done(&mut self) -> Result<()> {
        self.close()
    }
}

impl StreamEncoder for ImuEncoder {
    type Input = MergedInertialSample;

    fn name(&self) -> &'static str {
        "imu"
    }

    /// `_row` is implied by file order and not written
    fn encode(&mut self, _row: usize, sample: &MergedInertialSample) -> Result<()> {
        let (a, w) = (sample.linear, sample.angular);
        let line = format!("{}, {}", sample.timestamp, join_values([a.x, a.y, a.z, w.x, w.y, w.z]));
        self.csv.write_row(&line).inspect_err(|e| {
            if !matches!(e, EncoderError::Closed) {
                self.tally.recoverable("imu", EncoderFault::RowWrite, e);
            }
        })
    }

    fn status(&self) -> EncoderStatus {
        self.tally.status
    }

    fn close(&mut self) -> Result<()> {
        self.tally.summarize("imu");
        self.csv.close().inspect_err(|e| {
            log::error!("Closing IMU file {:?} failed: {}", self.csv.path(), e);
            self.tally.fatal("imu", EncoderFault::RowWrite, e);
        })
    }
}
