// Confidence map encoder: one 8-bit grayscale PNG per saved frame

use std::path::PathBuf;

use super::{
    frame_file_name, write_png, EncoderError, EncoderFault, EncoderStatus, FailureTally, Result,
    StreamEncoder,
};
use crate::capture::ConfidenceMap;

pub struct ConfidenceEncoder {
    dir: PathBuf,
    tally: FailureTally,
    frames_written: usize,
    closed: bool,
}

impl ConfidenceEncoder {
    /// `dir` must already exist
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            tally: FailureTally::default(),
            frames_written: 0,
            closed: false,
        }
    }

    pub fn frames_written(&self) -> usize {
        self.frames_written
    }
}

impl StreamEncoder for ConfidenceEncoder {
    type Input = ConfidenceMap;

    fn name(&self) -> &'static str {
        "confidence"
    }

    fn encode(&mut self, sequence: usize, confidence: &ConfidenceMap) -> Result<()> {
        if self.closed {
            return Err(EncoderError::Closed);
        }

        let result = if confidence.is_well_formed() {
            let path = self.dir.join(frame_file_name(sequence, "png"));
            write_png(
                &path,
                confidence.width,
                confidence.height,
                png::ColorType::Grayscale,
                png::BitDepth::Eight,
                &confidence.data,
            )
        } else {
            Err(EncoderError::InvalidInput(format!(
                "confidence buffer is {} bytes for {}x{}",
                confidence.data.len(),
                confidence.width,
                confidence.height
            )))
        };

        match result {
            Ok(()) => {
                self.frames_written += 1;
                Ok(())
            }
            Err(e) => {
                self.tally.recoverable("confidence", EncoderFault::ConfidenceEncoding, &e);
                Err(e)
            }
        }
    }

    fn status(&self) -> EncoderStatus {
        self.tally.status
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.tally.summarize("confidence");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_written_as_png() {
        let dir = tempfile::tempdir().unwrap();
        let mut encoder = ConfidenceEncoder::new(dir.path().to_path_buf());
        let map = ConfidenceMap { width: 3, height: 1, data: vec![0, 1, 2] };

        encoder.encode(12, &map).unwrap();

        let bytes = std::fs::read(dir.path().join("000012.png")).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
        assert_eq!(encoder.status(), EncoderStatus::Ok);
    }

    #[test]
    fn test_write_into_missing_dir_is_encoding_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut encoder = ConfidenceEncoder::new(dir.path().join("gone"));
        let map = ConfidenceMap { width: 1, height: 1, data: vec![2] };

        assert!(encoder.encode(0, &map).is_err());
        assert_eq!(encoder.status(), EncoderStatus::Recoverable(EncoderFault::ConfidenceEncoding));
        encoder.close().unwrap();
        assert!(encoder.encode(1, &map).is_err());
    }
}
