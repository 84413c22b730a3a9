// RGB stream encoder: one PNG per saved frame, or a single continuous container

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::video::{frame_duration_ns, presentation_time_ns};
use super::{
    frame_file_name, open_video_sink, write_png, EncoderError, EncoderFault, EncoderStatus,
    FailureTally, Result, SinkState, StreamEncoder, VideoSink,
};
use crate::capture::RgbImage;

/// Interval between readiness polls while the container sink is backed up
const READY_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Opens a container sink once the frame size is known
pub type SinkOpener = Box<dyn FnMut(&Path, u32, u32) -> Result<Box<dyn VideoSink>> + Send>;

enum Target {
    Frames {
        dir: PathBuf,
    },
    Container {
        path: PathBuf,
        sink: Option<Box<dyn VideoSink>>,
        opener: SinkOpener,
        ready_timeout: Duration,
    },
}

pub struct RgbEncoder {
    target: Target,
    tally: FailureTally,
    frames_written: usize,
    closed: bool,
}

impl RgbEncoder {
    /// Write `NNNNNN.png` files into `dir` (which must already exist)
    pub fn png_frames(dir: PathBuf) -> Self {
        Self::with_target(Target::Frames { dir })
    }

    /// Append to a single container at `path` using the platform sink
    pub fn container(path: PathBuf, ready_timeout: Duration) -> Self {
        Self::container_with(path, ready_timeout, Box::new(open_video_sink))
    }

    /// Append to a single container at `path`, opening the sink with `opener`
    pub fn container_with(path: PathBuf, ready_timeout: Duration, opener: SinkOpener) -> Self {
        Self::with_target(Target::Container { path, sink: None, opener, ready_timeout })
    }

    fn with_target(target: Target) -> Self {
        Self {
            target,
            tally: FailureTally::default(),
            frames_written: 0,
            closed: false,
        }
    }

    pub fn frames_written(&self) -> usize {
        self.frames_written
    }

    fn write(&mut self, sequence: usize, capture_index: usize, image: &RgbImage) -> Result<()> {
        if !image.is_well_formed() {
            return Err(EncoderError::InvalidInput(format!(
                "rgb buffer is {} bytes for {}x{}",
                image.data.len(),
                image.width,
                image.height
            )));
        }

        match &mut self.target {
            Target::Frames { dir } => {
                let path = dir.join(frame_file_name(sequence, "png"));
                write_png(&path, image.width, image.height, png::ColorType::Rgb, png::BitDepth::Eight, &image.data)
            }
            Target::Container { path, sink, opener, ready_timeout } => {
                if sink.is_none() {
                    *sink = Some(opener(path.as_path(), image.width, image.height)?);
                }
                let Some(sink) = sink.as_mut() else {
                    return Err(EncoderError::Closed);
                };

                // The sink takes one frame at a time; wait for it rather than dropping
                let started = Instant::now();
                while !sink.is_ready_for_more() {
                    if let SinkState::Failed(err) = sink.state() {
                        return Err(EncoderError::Sink(err));
                    }
                    if started.elapsed() >= *ready_timeout {
                        return Err(EncoderError::Sink(format!(
                            "sink not ready after {:?}, frame {} dropped",
                            ready_timeout, sequence
                        )));
                    }
                    log::debug!("Video sink busy, sleeping");
                    std::thread::sleep(READY_POLL_INTERVAL);
                }

                sink.append(image, presentation_time_ns(capture_index), frame_duration_ns())
            }
        }
    }

    /// Encode saved frame `sequence`, which was raw camera frame `capture_index`.
    /// PNG names follow `sequence`; container timestamps follow `capture_index`.
    pub fn encode_frame(&mut self, sequence: usize, capture_index: usize, image: &RgbImage) -> Result<()> {
        if self.closed {
            return Err(EncoderError::Closed);
        }
        if self.tally.status.is_fatal() {
            // A dead container stays dead for the rest of the session
            return Err(EncoderError::Sink("container sink already failed".into()));
        }

        match self.write(sequence, capture_index, image) {
            Ok(()) => {
                self.frames_written += 1;
                Ok(())
            }
            Err(e) => {
                // A sink that never opened or reported a terminal state is fatal;
                // anything else loses just this frame
                let sink_missing = matches!(self.target, Target::Container { sink: None, .. })
                    && !matches!(e, EncoderError::InvalidInput(_));
                if sink_missing || self.sink_failed().is_some() {
                    self.tally.fatal("rgb", EncoderFault::VideoEncoding, &e);
                } else {
                    self.tally.recoverable("rgb", EncoderFault::VideoEncoding, &e);
                }
                Err(e)
            }
        }
    }

    fn sink_failed(&mut self) -> Option<String> {
        match &mut self.target {
            Target::Container { sink: Some(sink), .. } => match sink.state() {
                SinkState::Failed(err) => Some(err),
                _ => None,
            },
            _ => None,
        }
    }
}

impl StreamEncoder for RgbEncoder {
    type Input = RgbImage;

    fn name(&self) -> &'static str {
        "rgb"
    }

    /// Encode with no decimation: the capture index is the sequence index
    fn encode(&mut self, sequence: usize, image: &RgbImage) -> Result<()> {
        self.encode_frame(sequence, sequence, image)
    }

    fn status(&self) -> EncoderStatus {
        self.tally.status
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.tally.summarize("rgb");

        if let Target::Container { sink: Some(sink), .. } = &mut self.target {
            if let SinkState::Failed(err) = sink.state() {
                let e = EncoderError::Sink(err);
                self.tally.fatal("rgb", EncoderFault::VideoEncoding, &e);
                return Err(e);
            }
            if let Err(e) = sink.finish() {
                self.tally.fatal("rgb", EncoderFault::VideoEncoding, &e);
                return Err(e);
            }
        }

        log::info!("RGB stream finished: {} frames", self.frames_written);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn image(width: u32, height: u32) -> RgbImage {
        RgbImage { width, height, data: vec![128; (width * height * 3) as usize] }
    }

    #[derive(Default)]
    struct SinkLog {
        appended: Vec<u64>,
        ready_polls: usize,
        finished: bool,
    }

    /// Reports "busy" for the first `busy_polls` readiness checks of every frame
    struct FakeSink {
        log: Arc<Mutex<SinkLog>>,
        busy_polls: usize,
        busy_left: AtomicUsize,
        fail_after: Option<usize>,
    }

    impl VideoSink for FakeSink {
        fn is_ready_for_more(&self) -> bool {
            self.log.lock().ready_polls += 1;
            let left = self.busy_left.load(Ordering::SeqCst);
            if left == 0 {
                self.busy_left.store(self.busy_polls, Ordering::SeqCst);
                true
            } else {
                self.busy_left.store(left - 1, Ordering::SeqCst);
                false
            }
        }

        fn append(&mut self, _image: &RgbImage, pts_ns: u64, _duration_ns: u64) -> Result<()> {
            self.log.lock().appended.push(pts_ns);
            Ok(())
        }

        fn state(&mut self) -> SinkState {
            let log = self.log.lock();
            match self.fail_after {
                Some(n) if log.appended.len() >= n => SinkState::Failed("writer failed".into()),
                _ if log.finished => SinkState::Finished,
                _ => SinkState::Writing,
            }
        }

        fn finish(&mut self) -> Result<()> {
            self.log.lock().finished = true;
            Ok(())
        }
    }

    fn fake_opener(log: Arc<Mutex<SinkLog>>, busy_polls: usize, fail_after: Option<usize>) -> SinkOpener {
        Box::new(move |_path, _w, _h| {
            Ok(Box::new(FakeSink {
                log: log.clone(),
                busy_polls,
                busy_left: AtomicUsize::new(busy_polls),
                fail_after,
            }) as Box<dyn VideoSink>)
        })
    }

    #[test]
    fn test_png_frames_written_per_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let mut encoder = RgbEncoder::png_frames(dir.path().to_path_buf());

        for seq in 0..3 {
            encoder.encode(seq, &image(4, 2)).unwrap();
        }
        encoder.close().unwrap();

        assert!(dir.path().join("000000.png").exists());
        assert!(dir.path().join("000002.png").exists());
        assert_eq!(encoder.frames_written(), 3);
        assert_eq!(encoder.status(), EncoderStatus::Ok);
    }

    #[test]
    fn test_png_write_failure_is_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("not_created");
        let mut encoder = RgbEncoder::png_frames(missing);

        assert!(encoder.encode(0, &image(2, 2)).is_err());
        assert_eq!(encoder.status(), EncoderStatus::Recoverable(EncoderFault::VideoEncoding));
    }

    #[test]
    fn test_container_waits_for_busy_sink() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(Mutex::new(SinkLog::default()));
        let mut encoder = RgbEncoder::container_with(
            dir.path().join("rgb.mp4"),
            Duration::from_secs(5),
            fake_opener(log.clone(), 2, None),
        );

        encoder.encode(0, &image(2, 2)).unwrap();
        encoder.encode(1, &image(2, 2)).unwrap();
        encoder.close().unwrap();

        let log = log.lock();
        assert_eq!(log.appended, vec![0, presentation_time_ns(1)]);
        // Two busy polls plus one ready poll per frame
        assert_eq!(log.ready_polls, 6);
        assert!(log.finished);
        assert_eq!(encoder.status(), EncoderStatus::Ok);
    }

    #[test]
    fn test_container_timestamps_follow_capture_index() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(Mutex::new(SinkLog::default()));
        let mut encoder = RgbEncoder::container_with(
            dir.path().join("rgb.mp4"),
            Duration::from_secs(5),
            fake_opener(log.clone(), 0, None),
        );

        // Every fourth raw frame saved
        for seq in 0..3 {
            encoder.encode_frame(seq, seq * 4, &image(2, 2)).unwrap();
        }
        encoder.close().unwrap();

        let log = log.lock();
        assert_eq!(
            log.appended,
            vec![0, presentation_time_ns(4), presentation_time_ns(8)]
        );
        assert_eq!(log.appended[2], 8_000_000_000 / 60);
    }

    #[test]
    fn test_png_names_follow_sequence_not_capture_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut encoder = RgbEncoder::png_frames(dir.path().to_path_buf());

        encoder.encode_frame(1, 12, &image(2, 2)).unwrap();

        assert!(dir.path().join("000001.png").exists());
        assert!(!dir.path().join("000012.png").exists());
    }

    #[test]
    fn test_container_ready_timeout_drops_frame() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(Mutex::new(SinkLog::default()));
        let mut encoder = RgbEncoder::container_with(
            dir.path().join("rgb.mp4"),
            Duration::from_millis(30),
            fake_opener(log.clone(), usize::MAX, None),
        );

        assert!(encoder.encode(0, &image(2, 2)).is_err());
        assert_eq!(encoder.status(), EncoderStatus::Recoverable(EncoderFault::VideoEncoding));
        assert!(log.lock().appended.is_empty());
    }

    #[test]
    fn test_container_terminal_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(Mutex::new(SinkLog::default()));
        let mut encoder = RgbEncoder::container_with(
            dir.path().join("rgb.mp4"),
            Duration::from_secs(1),
            fake_opener(log.clone(), 0, Some(1)),
        );

        encoder.encode(0, &image(2, 2)).unwrap();
        assert!(encoder.close().is_err());
        assert_eq!(encoder.status(), EncoderStatus::Fatal(EncoderFault::VideoEncoding));
    }

    #[test]
    fn test_container_open_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut encoder = RgbEncoder::container_with(
            dir.path().join("rgb.mp4"),
            Duration::from_secs(1),
            Box::new(|_, _, _| Err(EncoderError::NotAvailable("no muxer".into()))),
        );

        assert!(encoder.encode(0, &image(2, 2)).is_err());
        assert!(encoder.status().is_fatal());
        // Later frames are refused without retrying the sink
        assert!(encoder.encode(1, &image(2, 2)).is_err());
        assert_eq!(encoder.frames_written(), 0);
    }
}
