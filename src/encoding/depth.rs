// Depth map encoder: one 16-bit grayscale PNG per saved frame, in millimetres

use std::path::PathBuf;

use super::{
    frame_file_name, write_png, EncoderError, EncoderFault, EncoderStatus, FailureTally, Result,
    StreamEncoder,
};
use crate::capture::DepthMap;

pub struct DepthEncoder {
    dir: PathBuf,
    tally: FailureTally,
    frames_written: usize,
    closed: bool,
}

impl DepthEncoder {
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

    fn write(&self, sequence: usize, depth: &DepthMap) -> Result<()> {
        if !depth.is_well_formed() {
            return Err(EncoderError::InvalidInput(format!(
                "depth buffer has {} values for {}x{}",
                depth.data.len(),
                depth.width,
                depth.height
            )));
        }
        let bytes: Vec<u8> = depth
            .data
            .iter()
            .flat_map(|&metres| metres_to_millimetres(metres).to_be_bytes())
            .collect();
        let path = self.dir.join(frame_file_name(sequence, "png"));
        write_png(&path, depth.width, depth.height, png::ColorType::Grayscale, png::BitDepth::Sixteen, &bytes)
    }
}

/// Invalid or negative depth maps to 0; values past the u16 range saturate
pub fn metres_to_millimetres(metres: f32) -> u16 {
    if !metres.is_finite() || metres <= 0.0 {
        return 0;
    }
    (metres * 1000.0).round().min(u16::MAX as f32) as u16
}

impl StreamEncoder for DepthEncoder {
    type Input = DepthMap;

    fn name(&self) -> &'static str {
        "depth"
    }

    fn encode(&mut self, sequence: usize, depth: &DepthMap) -> Result<()> {
        if self.closed {
            return Err(EncoderError::Closed);
        }
        match self.write(sequence, depth) {
            Ok(()) => {
                self.frames_written += 1;
                Ok(())
            }
            Err(e) => {
                self.tally.recoverable("depth", EncoderFault::FrameEncoding, &e);
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
            self.tally.summarize("depth");
        }
        Ok(())
    }
}
