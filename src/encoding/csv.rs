// Line-oriented CSV file shared by the odometry and IMU encoders

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::{EncoderError, Result};

/// Rows are flushed at least this often so a crash loses little data
const FLUSH_INTERVAL: Duration = Duration::from_millis(100);

pub(crate) struct CsvFile {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    rows: usize,
    last_flush: Instant,
}

impl CsvFile {
    /// Create (or truncate) the file and write the header line
    pub fn create(path: &Path, header: &str) -> Result<Self> {
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(header.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(writer),
            rows: 0,
            last_flush: Instant::now(),
        })
    }

    pub fn write_row(&mut self, row: &str) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(EncoderError::Closed)?;
        writer.write_all(row.as_bytes())?;
        writer.write_all(b"\n")?;
        self.rows += 1;

        if self.last_flush.elapsed() >= FLUSH_INTERVAL {
            writer.flush()?;
            self.last_flush = Instant::now();
        }
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and close; a second call is a no-op
    pub fn close(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            let file = writer.into_inner().map_err(|e| EncoderError::Io(e.into_error()))?;
            file.sync_all()?;
        }
        Ok(())
    }
}

/// Join values as `a, b, c` (comma + space, matching the header style)
pub(crate) fn join_values<I>(values: I) -> String
where
    I: IntoIterator,
    I::Item: std::fmt::Display,
{
    values
        .into_iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
