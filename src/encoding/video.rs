//! Continuous-container output for the RGB stream
//!
//! A `VideoSink` accepts raw RGB frames with presentation times and muxes them
//! into a single file. Sinks are not safe for concurrent appends; the RGB encoder
//! owns one and feeds it from the encode queue only.
//!
//! The GStreamer-backed sink is compiled with the `video` feature:
//! `appsrc ! videoconvert ! x264enc ! h264parse ! mp4mux ! filesink`

use std::path::Path;

use super::{EncoderError, Result};
use crate::capture::RgbImage;

/// Container presentation timescale, in ticks per second
pub const TIMESCALE: u64 = 60;

/// Presentation time of the `capture_index`-th raw camera frame, in nanoseconds.
/// Decimated frames leave gaps so the container keeps capture-time spacing.
pub fn presentation_time_ns(capture_index: usize) -> u64 {
    capture_index as u64 * 1_000_000_000 / TIMESCALE
}

/// Duration of one tick, in nanoseconds
pub fn frame_duration_ns() -> u64 {
    1_000_000_000 / TIMESCALE
}

/// Observable state of a sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkState {
    Writing,
    /// Terminal. Nothing more will be written.
    Failed(String),
    Finished,
}

pub trait VideoSink: Send {
    /// Whether the sink can take another frame without blocking
    fn is_ready_for_more(&self) -> bool;

    fn append(&mut self, image: &RgbImage, pts_ns: u64, duration_ns: u64) -> Result<()>;

    fn state(&mut self) -> SinkState;

    /// Flush and finalize the container
    fn finish(&mut self) -> Result<()>;
}

/// Open the platform container sink for an RGB stream of the given size
#[cfg(feature = "video")]
pub fn open_video_sink(path: &Path, width: u32, height: u32) -> Result<Box<dyn VideoSink>> {
    Ok(Box::new(gst_sink::Mp4Sink::new(path, width, height)?))
}

/// Open the platform container sink for an RGB stream of the given size
#[cfg(not(feature = "video"))]
pub fn open_video_sink(path: &Path, _width: u32, _height: u32) -> Result<Box<dyn VideoSink>> {
    Err(EncoderError::NotAvailable(format!(
        "cannot write {}: built without the `video` feature",
        path.display()
    )))
}

#[cfg(feature = "video")]
mod gst_sink {
    use std::path::{Path, PathBuf};

    use gstreamer as gst;
    use gstreamer::prelude::*;
    use gstreamer_app as gst_app;
    use gstreamer_video as gst_video;

    use super::{SinkState, VideoSink, TIMESCALE};
    use crate::capture::RgbImage;
    use crate::encoding::{EncoderError, Result};

    /// Frames queued in appsrc before the sink reports "not ready"
    const QUEUED_FRAMES: u64 = 8;

    pub struct Mp4Sink {
        pipeline: gst::Pipeline,
        appsrc: gst_app::AppSrc,
        output_path: PathBuf,
        failure: Option<String>,
        finished: bool,
    }

    impl Mp4Sink {
        pub fn new(path: &Path, width: u32, height: u32) -> Result<Self> {
            gst::init().map_err(|e| EncoderError::NotAvailable(format!("GStreamer init failed: {}", e)))?;

            let caps = gst_video::VideoInfo::builder(gst_video::VideoFormat::Rgb, width, height)
                .fps(gst::Fraction::new(TIMESCALE as i32, 1))
                .build()
                .and_then(|info| info.to_caps())
                .map_err(|e| EncoderError::Sink(format!("Invalid video caps: {}", e)))?;

            let frame_bytes = width as u64 * height as u64 * 3;
            let appsrc = gst_app::AppSrc::builder()
                .name("src")
                .caps(&caps)
                .format(gst::Format::Time)
                .is_live(true)
                .max_bytes(frame_bytes * QUEUED_FRAMES)
                .build();

            let make = |factory: &str| {
                gst::ElementFactory::make(factory)
                    .build()
                    .map_err(|e| EncoderError::NotAvailable(format!("Failed to create {}: {}", factory, e)))
            };

            let convert = make("videoconvert")?;
            let encoder = make("x264enc")?;
            encoder.set_property_from_str("tune", "zerolatency");
            encoder.set_property_from_str("speed-preset", "ultrafast");
            let parser = make("h264parse")?;
            let muxer = make("mp4mux")?;
            let filesink = gst::ElementFactory::make("filesink")
                .property("location", path.to_string_lossy().to_string())
                .property("async", false)
                .build()
                .map_err(|e| EncoderError::Sink(format!("Failed to create filesink: {}", e)))?;

            let pipeline = gst::Pipeline::new();
            pipeline
                .add_many([appsrc.upcast_ref(), &convert, &encoder, &parser, &muxer, &filesink])
                .map_err(|e| EncoderError::Sink(format!("Failed to add elements: {}", e)))?;
            gst::Element::link_many([appsrc.upcast_ref(), &convert, &encoder, &parser, &muxer, &filesink])
                .map_err(|e| EncoderError::Sink(format!("Failed to link elements: {}", e)))?;

            pipeline
                .set_state(gst::State::Playing)
                .map_err(|e| EncoderError::Sink(format!("Failed to start pipeline: {:?}", e)))?;

            log::info!("Video sink started: {:?} ({}x{})", path, width, height);

            Ok(Self {
                pipeline,
                appsrc,
                output_path: path.to_path_buf(),
                failure: None,
                finished: false,
            })
        }

        fn poll_bus(&mut self) {
            let Some(bus) = self.pipeline.bus() else { return };
            while let Some(msg) = bus.pop_filtered(&[gst::MessageType::Error]) {
                if let gst::MessageView::Error(err) = msg.view() {
                    let text = format!("{} ({:?})", err.error(), err.debug());
                    log::error!("Video pipeline error: {}", text);
                    self.failure.get_or_insert(text);
                }
            }
        }
    }

    impl VideoSink for Mp4Sink {
        fn is_ready_for_more(&self) -> bool {
            self.appsrc.current_level_bytes() < self.appsrc.max_bytes()
        }

        fn append(&mut self, image: &RgbImage, pts_ns: u64, duration_ns: u64) -> Result<()> {
            let mut buffer = gst::Buffer::from_slice(image.data.clone());
            {
                let buffer_ref = buffer
                    .get_mut()
                    .ok_or_else(|| EncoderError::Sink("freshly created buffer is shared".into()))?;
                buffer_ref.set_pts(gst::ClockTime::from_nseconds(pts_ns));
                buffer_ref.set_duration(gst::ClockTime::from_nseconds(duration_ns));
            }
            self.appsrc
                .push_buffer(buffer)
                .map_err(|e| EncoderError::Sink(format!("Failed to push buffer: {:?}", e)))?;
            Ok(())
        }

        fn state(&mut self) -> SinkState {
            self.poll_bus();
            match (&self.failure, self.finished) {
                (Some(err), _) => SinkState::Failed(err.clone()),
                (None, true) => SinkState::Finished,
                (None, false) => SinkState::Writing,
            }
        }

        fn finish(&mut self) -> Result<()> {
            if self.finished {
                return Ok(());
            }
            self.finished = true;

            if let Err(e) = self.appsrc.end_of_stream() {
                log::warn!("Failed to send EOS to video sink: {:?}", e);
            }

            let mut pipeline_error = None;
            if let Some(bus) = self.pipeline.bus() {
                for msg in bus.iter_timed(gst::ClockTime::from_seconds(5)) {
                    match msg.view() {
                        gst::MessageView::Eos(..) => break,
                        gst::MessageView::Error(err) => {
                            pipeline_error = Some(format!("{} ({:?})", err.error(), err.debug()));
                            break;
                        }
                        _ => {}
                    }
                }
            }

            // Always drop to NULL before releasing the pipeline
            let _ = self.pipeline.set_state(gst::State::Null);

            if let Some(err) = pipeline_error {
                self.failure.get_or_insert(err.clone());
                return Err(EncoderError::Sink(err));
            }

            let size = std::fs::metadata(&self.output_path).map(|m| m.len()).unwrap_or(0);
            log::info!("Video sink finished: {:?} ({} bytes)", self.output_path, size);
            Ok(())
        }
    }

    impl Drop for Mp4Sink {
        fn drop(&mut self) {
            if !self.finished {
                let _ = self.pipeline.set_state(gst::State::Null);
            }
        }
    }
}
