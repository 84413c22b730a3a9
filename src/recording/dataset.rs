// Dataset session coordinator
//
// Owns one session's directory and encoders. Capture callbacks call `add` and
// `add_inertial_sample` from their own threads; frame encoding runs on a single
// serialized worker so `add` never blocks. `finish` is the only blocking call.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::inertial::InertialMerger;
use super::queue::EncodeQueue;
use crate::capture::{CaptureSink, Frame, InertialKind, InertialSample, Vec3};
use crate::config::{Config, RgbOutput};
use crate::encoding::rgb::SinkOpener;
use crate::encoding::{
    combine, ConfidenceEncoder, DepthEncoder, ImuEncoder, OdometryEncoder, PoseRecord, RgbEncoder,
    SessionStatus, StreamEncoder,
};
use crate::session::{
    write_camera_matrix, write_manifest, SessionCounts, SessionDescriptor, SessionLayout,
    SessionManifest,
};

/// Errors that prevent a session object from being created at all
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Failed to start encode worker: {0}")]
    Worker(#[from] std::io::Error),
}

/// Settings a session is started with
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub storage_root: PathBuf,
    pub attempt: u32,
    /// Dispatch one of every `fps_divider` raw frames
    pub fps_divider: u32,
    pub rgb_output: RgbOutput,
    pub video_ready_timeout: Duration,
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            storage_root: config.storage_path.clone(),
            attempt: config.attempt_number,
            fps_divider: config.fps_divider.value(),
            rgb_output: config.rgb_output,
            video_ready_timeout: config.video_ready_timeout(),
        }
    }
}

/// Per-frame encoders; only touched by the encode worker until `finish`
struct FrameEncoders {
    rgb: RgbEncoder,
    depth: DepthEncoder,
    confidence: ConfidenceEncoder,
    odometry: OdometryEncoder,
}

impl FrameEncoders {
    fn encode(&mut self, sequence: usize, capture_index: usize, frame: &Frame) {
        // Failures are folded into each encoder's status
        let _ = self.rgb.encode_frame(sequence, capture_index, &frame.image);
        if let Some(depth) = &frame.depth {
            let _ = self.depth.encode(sequence, depth);
            if let Some(confidence) = &frame.confidence {
                let _ = self.confidence.encode(sequence, confidence);
            }
        }
        let record = PoseRecord { timestamp: frame.timestamp, pose: frame.pose };
        let _ = self.odometry.encode(sequence, &record);
    }

    fn close(&mut self) -> SessionStatus {
        [
            close_encoder(&mut self.odometry),
            close_encoder(&mut self.rgb),
            close_encoder(&mut self.depth),
            close_encoder(&mut self.confidence),
        ]
        .into_iter()
        .fold(SessionStatus::AllGood, combine)
    }
}

fn close_encoder<E: StreamEncoder>(encoder: &mut E) -> SessionStatus {
    if let Err(e) = encoder.close() {
        log::error!("Failed to close {} encoder: {}", encoder.name(), e);
    }
    encoder.status().into()
}

struct InertialStage {
    merger: InertialMerger,
    encoder: Option<ImuEncoder>,
}

#[derive(Debug, Default)]
struct Counters {
    raw: usize,
    saved: usize,
    missing_depth: usize,
    missing_confidence: usize,
}

/// One recording session
pub struct DatasetSession {
    id: String,
    label: String,
    attempt: u32,
    fps_divider: usize,
    layout: SessionLayout,
    created_at: DateTime<Utc>,
    started: Instant,
    /// AllGood, or DirectoryCreationError when the tree could not be set up
    setup_status: SessionStatus,
    counters: Mutex<Counters>,
    encoders: Option<Arc<Mutex<FrameEncoders>>>,
    inertial: Mutex<InertialStage>,
    /// Most recently dispatched frame, kept for the intrinsics file
    last_frame: Mutex<Option<Arc<Frame>>>,
    queue: Mutex<EncodeQueue>,
    closed: AtomicBool,
    outcome: Mutex<Option<(SessionStatus, f64)>>,
}

impl DatasetSession {
    /// Create the session directory and encoders for `label`
    pub fn start(settings: &SessionSettings, label: &str) -> Result<Arc<Self>, SessionError> {
        Self::start_with_sink(settings, label, None)
    }

    /// Like `start`, with a custom container sink for `RgbOutput::Video`
    pub fn start_with_sink(
        settings: &SessionSettings,
        label: &str,
        sink_opener: Option<SinkOpener>,
    ) -> Result<Arc<Self>, SessionError> {
        let id = uuid::Uuid::new_v4().to_string();
        let layout = SessionLayout::new(&settings.storage_root, settings.attempt, label, settings.rgb_output);
        let queue = EncodeQueue::new("arcapture-encode")?;

        let (encoders, imu, setup_status) = match Self::open_encoders(&layout, settings, sink_opener) {
            Ok((encoders, imu)) => (Some(Arc::new(Mutex::new(encoders))), Some(imu), SessionStatus::AllGood),
            Err(e) => {
                log::error!("Failed to set up session directory {:?}: {}", layout.dir(), e);
                (None, None, SessionStatus::DirectoryCreationError)
            }
        };

        log::info!(
            "Session {} started: {:?} (1 of every {} frames)",
            id,
            layout.dir(),
            settings.fps_divider
        );

        Ok(Arc::new(Self {
            id,
            label: label.to_string(),
            attempt: settings.attempt,
            fps_divider: settings.fps_divider.max(1) as usize,
            layout,
            created_at: Utc::now(),
            started: Instant::now(),
            setup_status,
            counters: Mutex::new(Counters::default()),
            encoders,
            inertial: Mutex::new(InertialStage { merger: InertialMerger::new(), encoder: imu }),
            last_frame: Mutex::new(None),
            queue: Mutex::new(queue),
            closed: AtomicBool::new(false),
            outcome: Mutex::new(None),
        }))
    }

    fn open_encoders(
        layout: &SessionLayout,
        settings: &SessionSettings,
        sink_opener: Option<SinkOpener>,
    ) -> crate::encoding::Result<(FrameEncoders, ImuEncoder)> {
        if let Some(previous) = layout.previous_manifest() {
            log::warn!(
                "{:?} already holds session {} ({:?}); its files will be overwritten",
                layout.dir(),
                previous.id,
                previous.status
            );
        }
        layout.create_dirs()?;

        let rgb_path = layout.absolute(&layout.rgb());
        let rgb = match (settings.rgb_output, sink_opener) {
            (RgbOutput::PngFrames, _) => RgbEncoder::png_frames(rgb_path),
            (RgbOutput::Video, Some(opener)) => {
                RgbEncoder::container_with(rgb_path, settings.video_ready_timeout, opener)
            }
            (RgbOutput::Video, None) => RgbEncoder::container(rgb_path, settings.video_ready_timeout),
        };

        let encoders = FrameEncoders {
            rgb,
            depth: DepthEncoder::new(layout.absolute(&layout.depth())),
            confidence: ConfidenceEncoder::new(layout.absolute(&layout.confidence())),
            odometry: OdometryEncoder::create(&layout.absolute(&layout.odometry()))?,
        };
        let imu = ImuEncoder::create(&layout.absolute(&layout.imu()))?;
        Ok((encoders, imu))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn layout(&self) -> &SessionLayout {
        &self.layout
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn setup_status(&self) -> SessionStatus {
        self.setup_status
    }

    /// Frames delivered so far, including decimated ones
    pub fn raw_frames(&self) -> usize {
        self.counters.lock().raw
    }

    /// Frames dispatched to the encoders so far
    pub fn saved_frames(&self) -> usize {
        self.counters.lock().saved
    }

    pub fn imu_rows(&self) -> usize {
        self.inertial.lock().merger.merged()
    }

    /// Status from `finish`, or None while still recording
    pub fn status(&self) -> Option<SessionStatus> {
        self.outcome.lock().map(|(status, _)| status)
    }

    /// Stop time minus start time once finished, elapsed time before that
    pub fn duration_secs(&self) -> f64 {
        match *self.outcome.lock() {
            Some((_, duration)) => duration,
            None => self.started.elapsed().as_secs_f64(),
        }
    }

    /// Accept one raw frame. Returns the sequence index if it was dispatched.
    pub fn add(&self, frame: Frame) -> Option<usize> {
        let queue = self.queue.lock();
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }

        let (sequence, capture_index) = {
            let mut counters = self.counters.lock();
            let capture_index = counters.raw;
            let dispatch = capture_index % self.fps_divider == 0;
            counters.raw += 1;
            if !dispatch {
                return None;
            }
            let sequence = counters.saved;
            counters.saved += 1;

            if frame.depth.is_none() {
                counters.missing_depth += 1;
                if counters.missing_depth == 1 {
                    log::warn!("Frame {} has no depth data; skipping depth and confidence", sequence);
                }
            } else if frame.confidence.is_none() {
                counters.missing_confidence += 1;
                if counters.missing_confidence == 1 {
                    log::warn!("Frame {} has no confidence data; skipping confidence", sequence);
                }
            }
            (sequence, capture_index)
        };

        let frame = Arc::new(frame);
        *self.last_frame.lock() = Some(Arc::clone(&frame));

        if let Some(encoders) = &self.encoders {
            let encoders = Arc::clone(encoders);
            if !queue.submit(move || encoders.lock().encode(sequence, capture_index, &frame)) {
                log::error!("Encode worker is gone; frame {} not written", sequence);
            }
        }
        Some(sequence)
    }

    /// Store an accelerometer or gyroscope reading; writes a row once both are present
    pub fn add_inertial_sample(&self, kind: InertialKind, value: Vec3, timestamp: f64) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        let mut stage = self.inertial.lock();
        let InertialStage { merger, encoder } = &mut *stage;
        if let Some(row) = merger.push(InertialSample { kind, value, timestamp }) {
            if let Some(encoder) = encoder {
                let _ = encoder.encode(merger.merged() - 1, &row);
            }
        }
    }

    /// Drain outstanding encodes, close every encoder and write the camera
    /// matrix and manifest. Later calls return the first result.
    pub fn finish(&self) -> SessionStatus {
        let mut outcome = self.outcome.lock();
        if let Some((status, _)) = *outcome {
            return status;
        }
        let duration_secs = self.started.elapsed().as_secs_f64();

        {
            let mut queue = self.queue.lock();
            self.closed.store(true, Ordering::SeqCst);
            queue.wait_idle();
            queue.shutdown();
        }

        let mut status = self.setup_status;

        {
            let mut stage = self.inertial.lock();
            if stage.merger.has_pending() {
                log::debug!("Dropping unpaired inertial sample at session end");
            }
            if let Some(imu) = stage.encoder.as_mut() {
                if let Err(e) = imu.done() {
                    log::error!("Failed to close imu encoder: {}", e);
                }
                status = combine(status, imu.status().into());
            }
        }

        if let Some(encoders) = &self.encoders {
            status = combine(status, encoders.lock().close());
            status = combine(status, self.write_intrinsics());
        }

        let counters = {
            let counters = self.counters.lock();
            if counters.missing_depth > 0 || counters.missing_confidence > 0 {
                log::warn!(
                    "Session {}: {} frames without depth, {} without confidence",
                    self.id,
                    counters.missing_depth,
                    counters.missing_confidence
                );
            }
            SessionCounts {
                raw_frames: counters.raw,
                saved_frames: counters.saved,
                imu_rows: self.inertial.lock().merger.merged(),
            }
        };

        if self.setup_status != SessionStatus::DirectoryCreationError {
            let manifest = self.manifest(status, duration_secs, counters);
            if let Err(e) = write_manifest(&self.layout.absolute(&self.layout.manifest()), &manifest) {
                log::error!("Failed to write session manifest: {}", e);
            }
        }

        log::info!(
            "Session {} finished: {:?}, {} of {} frames saved, {} imu rows, {:.2}s",
            self.id,
            status,
            counters.saved_frames,
            counters.raw_frames,
            counters.imu_rows,
            duration_secs
        );

        *outcome = Some((status, duration_secs));
        status
    }

    fn write_intrinsics(&self) -> SessionStatus {
        let Some(frame) = self.last_frame.lock().clone() else {
            log::warn!("No frames recorded; camera matrix not written");
            return SessionStatus::AllGood;
        };
        let path = self.layout.absolute(&self.layout.camera_matrix());
        match write_camera_matrix(&path, &frame.intrinsics) {
            Ok(()) => SessionStatus::AllGood,
            Err(e) => {
                log::error!("Failed to write camera matrix {:?}: {}", path, e);
                SessionStatus::EncodingError
            }
        }
    }

    fn manifest(&self, status: SessionStatus, duration_secs: f64, counts: SessionCounts) -> SessionManifest {
        SessionManifest {
            id: self.id.clone(),
            label: self.label.clone(),
            attempt: self.attempt,
            status,
            created_at: self.created_at,
            duration_secs,
            fps_divider: self.fps_divider as u32,
            counts,
            rgb_path: self.layout.rgb(),
            depth_path: self.layout.depth(),
            confidence_path: self.layout.confidence(),
            camera_matrix_path: self.layout.camera_matrix(),
            odometry_path: self.layout.odometry(),
            imu_path: self.layout.imu(),
        }
    }

    /// Descriptor for the metadata store; uses the stop-minus-start duration
    pub fn descriptor(&self, name: String) -> SessionDescriptor {
        SessionDescriptor {
            id: self.id.clone(),
            duration_secs: self.duration_secs(),
            created_at: self.created_at,
            name,
            rgb_file_path: self.layout.rgb(),
            depth_file_path: self.layout.depth(),
        }
    }
}

impl CaptureSink for DatasetSession {
    fn on_frame(&self, frame: Frame) {
        self.add(frame);
    }

    fn on_accelerometer(&self, value: Vec3, timestamp: f64) {
        self.add_inertial_sample(InertialKind::LinearAcceleration, value, timestamp);
    }

    fn on_gyroscope(&self, value: Vec3, timestamp: f64) {
        self.add_inertial_sample(InertialKind::AngularRate, value, timestamp);
    }
}
