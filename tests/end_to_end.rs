// End-to-end scenarios: recorder, coordinator, encoders and metadata store together

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arcapture_lib::capture::{
    CaptureSink, ConfidenceMap, DepthMap, Frame, Intrinsics, Pose, RgbImage, Vec3,
};
use arcapture_lib::config::{Config, FpsDivider, RgbOutput};
use arcapture_lib::encoding::{self, SessionStatus, SinkState, VideoSink};
use arcapture_lib::recording::{
    DatasetSession, Phase, PhaseState, Recorder, SessionOutcome, SessionSettings, SilentTonePlayer,
};
use arcapture_lib::session::{read_camera_matrix, read_manifest, MetadataStore, SessionDatabase};

fn test_frame(index: usize) -> Frame {
    let (w, h) = (8u32, 6u32);
    let mut pose = Pose::identity();
    pose.matrix[0][3] = index as f64 * 0.01;
    Frame {
        timestamp: 100.0 + index as f64 / 60.0,
        image: RgbImage { width: w, height: h, data: vec![(index % 256) as u8; (w * h * 3) as usize] },
        depth: Some(DepthMap { width: 4, height: 3, data: vec![1.25; 12] }),
        confidence: Some(ConfidenceMap { width: 4, height: 3, data: vec![2; 12] }),
        pose,
        intrinsics: Intrinsics::new(1450.5, 1450.5, 960.25, 720.75),
    }
}

fn test_config(root: &Path, divider: FpsDivider) -> Config {
    Config {
        storage_path: root.to_path_buf(),
        fps_divider: divider,
        // Long enough that only an explicit stop ends a session
        session_duration_secs: 600.0,
        ..Config::default()
    }
}

fn recorder(config: &Config, frequencies: Vec<u32>, store: Arc<SessionDatabase>) -> Recorder {
    Recorder::new(config, PhaseState::new(frequencies), store, Box::new(SilentTonePlayer::new()))
}

fn file_count(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

fn line_count(path: &Path) -> usize {
    std::fs::read_to_string(path).unwrap().lines().count()
}

#[test]
fn three_second_session_at_divisor_four_saves_45_frames() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SessionDatabase::open_in_memory().unwrap());
    let recorder = recorder(&test_config(dir.path(), FpsDivider::Four), vec![3000, 2000, 1000], store.clone());

    let step = recorder.start_trigger(true).unwrap().unwrap();
    assert_eq!(step.label, "pre_3000");
    let session = recorder.active_session().unwrap();

    // 3 s of 60 fps capture
    for i in 0..180 {
        recorder.on_frame(test_frame(i));
    }
    let outcome = recorder.stop().unwrap();

    let SessionOutcome::Saved(descriptor) = outcome else {
        panic!("expected a saved session, got {:?}", outcome);
    };
    assert_eq!(session.status(), Some(SessionStatus::AllGood));
    assert_eq!(session.saved_frames(), 45);

    let layout = session.layout();
    let session_dir = dir.path().join("attempt_1").join("pre_3000");
    assert_eq!(layout.dir(), session_dir);
    assert_eq!(line_count(&session_dir.join("odometry.csv")), 46);
    assert_eq!(file_count(&session_dir.join("rgb_frames")), 45);
    assert_eq!(file_count(&session_dir.join("depth")), 45);
    assert_eq!(file_count(&session_dir.join("confidence")), 45);
    assert!(session_dir.join("rgb_frames").join("000044.png").exists());

    // Saved sequence indices are contiguous in the odometry file
    let odometry = std::fs::read_to_string(session_dir.join("odometry.csv")).unwrap();
    let indices: Vec<usize> = odometry
        .lines()
        .skip(1)
        .map(|l| l.split(", ").nth(1).unwrap().parse().unwrap())
        .collect();
    assert_eq!(indices, (0..45).collect::<Vec<_>>());

    assert_eq!(descriptor.name, "Recording 0");
    assert_eq!(descriptor.rgb_file_path, PathBuf::from("attempt_1/pre_3000/rgb_frames"));
    assert_eq!(descriptor.depth_file_path, PathBuf::from("attempt_1/pre_3000/depth"));
    assert_eq!(store.get_session(&descriptor.id).unwrap(), Some(descriptor));
}

#[test]
fn depth_failure_marks_session_failed_and_saves_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SessionDatabase::open_in_memory().unwrap());
    let recorder = recorder(&test_config(dir.path(), FpsDivider::One), vec![3000], store.clone());

    let finished = Arc::new(AtomicUsize::new(0));
    let counter = finished.clone();
    recorder.set_on_finished(Box::new(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    recorder.start_trigger(true).unwrap();
    let session = recorder.active_session().unwrap();
    let layout = session.layout().clone();
    std::fs::remove_dir_all(layout.absolute(&layout.depth())).unwrap();

    for i in 0..10 {
        recorder.on_frame(test_frame(i));
    }
    let outcome = recorder.stop().unwrap();

    assert_eq!(outcome, SessionOutcome::Failed(SessionStatus::EncodingError));
    assert_eq!(store.count_sessions().unwrap(), 0);
    // The dismiss callback runs regardless of outcome
    assert_eq!(finished.load(Ordering::SeqCst), 1);

    // The other streams still completed
    assert_eq!(file_count(&layout.absolute(&layout.rgb())), 10);
    assert_eq!(line_count(&layout.absolute(&layout.odometry())), 11);
    let manifest = read_manifest(&layout.absolute(&layout.manifest())).unwrap();
    assert_eq!(manifest.status, SessionStatus::EncodingError);
}

#[test]
fn trigger_sequence_walks_phases_and_creates_directories() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(SessionDatabase::open_in_memory().unwrap());
    let recorder = recorder(&test_config(dir.path(), FpsDivider::Sixty), vec![3000, 2000, 1000], store.clone());

    let mut visited = Vec::new();
    for _ in 0..6 {
        let step = recorder.start_trigger(true).unwrap().unwrap();
        // Release events between presses are ignored
        assert!(recorder.start_trigger(false).unwrap().is_none());
        recorder.on_frame(test_frame(0));
        recorder.stop().unwrap();
        visited.push((step.phase, step.frequency_hz, step.label));
    }

    let expected = [
        (Phase::Pre, 3000, "pre_3000"),
        (Phase::During, 3000, "3000"),
        (Phase::Post, 3000, "post_3000"),
        (Phase::Pre, 2000, "pre_2000"),
        (Phase::During, 2000, "2000"),
        (Phase::Post, 2000, "post_2000"),
    ];
    for ((phase, freq, label), (e_phase, e_freq, e_label)) in visited.iter().zip(expected) {
        assert_eq!((*phase, *freq, label.as_str()), (e_phase, e_freq, e_label));
        assert!(dir.path().join("attempt_1").join(label).join("session.json").is_file());
    }
    assert_eq!(recorder.phase_state().index(), 2);

    let seventh = recorder.start_trigger(true).unwrap().unwrap();
    assert_eq!((seventh.phase, seventh.frequency_hz), (Phase::Pre, 1000));
    recorder.stop().unwrap();

    let names: Vec<String> = store.list_sessions().unwrap().into_iter().map(|d| d.name).collect();
    assert_eq!(names.len(), 7);
    assert!(names.contains(&"Recording 6".to_string()));
}

#[test]
fn camera_matrix_round_trips_transposed_intrinsics() {
    let dir = tempfile::tempdir().unwrap();
    let settings = SessionSettings::from(&test_config(dir.path(), FpsDivider::One));
    let session = DatasetSession::start(&settings, "1000").unwrap();

    for i in 0..3 {
        session.add(test_frame(i));
    }
    assert_eq!(session.finish(), SessionStatus::AllGood);

    let layout = session.layout();
    let rows = read_camera_matrix(&layout.absolute(&layout.camera_matrix())).unwrap();
    assert_eq!(rows, [[1450.5, 0.0, 960.25], [0.0, 1450.5, 720.75], [0.0, 0.0, 1.0]]);
    assert_eq!(rows, test_frame(0).intrinsics.transposed_columns());
}

#[test]
fn restarting_a_label_reuses_its_directory() {
    let dir = tempfile::tempdir().unwrap();
    let settings = SessionSettings::from(&test_config(dir.path(), FpsDivider::One));

    let first = DatasetSession::start(&settings, "post_2000").unwrap();
    for i in 0..5 {
        first.add(test_frame(i));
    }
    assert_eq!(first.finish(), SessionStatus::AllGood);
    // The restart sees the earlier session's manifest before overwriting it
    assert_eq!(first.layout().previous_manifest().unwrap().id, first.id());

    let second = DatasetSession::start(&settings, "post_2000").unwrap();
    assert_eq!(second.setup_status(), SessionStatus::AllGood);
    for i in 0..3 {
        second.add(test_frame(i));
    }
    assert_eq!(second.finish(), SessionStatus::AllGood);

    let layout = second.layout();
    assert_eq!(layout.dir(), first.layout().dir());
    // Frames 0..2 were rewritten in place, 3 and 4 remain from the first run
    assert_eq!(file_count(&layout.absolute(&layout.rgb())), 5);
    assert_eq!(line_count(&layout.absolute(&layout.odometry())), 4);
    assert_eq!(read_manifest(&layout.absolute(&layout.manifest())).unwrap().id, second.id());
}

#[test]
fn concurrent_inertial_callbacks_only_write_complete_pairs() {
    let dir = tempfile::tempdir().unwrap();
    let settings = SessionSettings::from(&test_config(dir.path(), FpsDivider::One));
    let session = DatasetSession::start(&settings, "pre_1000").unwrap();

    let accel = {
        let session = session.clone();
        std::thread::spawn(move || {
            for i in 0..500 {
                session.on_accelerometer(Vec3::new(0.0, -1.0, 0.0), i as f64 * 0.01);
            }
        })
    };
    let gyro = {
        let session = session.clone();
        std::thread::spawn(move || {
            for i in 0..500 {
                session.on_gyroscope(Vec3::new(0.1, 0.0, 0.0), i as f64 * 0.01 + 0.005);
            }
        })
    };
    accel.join().unwrap();
    gyro.join().unwrap();
    session.finish();

    let layout = session.layout();
    let text = std::fs::read_to_string(layout.absolute(&layout.imu())).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next().unwrap(), "timestamp, a_x, a_y, a_z, alpha_x, alpha_y, alpha_z");

    let rows: Vec<Vec<f64>> = lines
        .map(|l| l.split(", ").map(|v| v.parse().unwrap()).collect())
        .collect();
    assert_eq!(rows.len(), session.imu_rows());
    assert!(!rows.is_empty() && rows.len() <= 500);
    for row in &rows {
        // Every row carries both a linear and an angular reading
        assert_eq!(row.len(), 7);
        assert_eq!(row[2], -1.0);
        assert_eq!(row[4], 0.1);
    }
}

/// Container sink that accepts every frame and records presentation times
struct CollectingSink {
    pts: Arc<parking_lot::Mutex<Vec<u64>>>,
    finished: bool,
}

impl VideoSink for CollectingSink {
    fn is_ready_for_more(&self) -> bool {
        true
    }

    fn append(&mut self, image: &RgbImage, pts_ns: u64, _duration_ns: u64) -> encoding::Result<()> {
        assert!(image.is_well_formed());
        self.pts.lock().push(pts_ns);
        Ok(())
    }

    fn state(&mut self) -> SinkState {
        if self.finished {
            SinkState::Finished
        } else {
            SinkState::Writing
        }
    }

    fn finish(&mut self) -> encoding::Result<()> {
        self.finished = true;
        Ok(())
    }
}

#[test]
fn container_output_keeps_capture_time_spacing() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path(), FpsDivider::Two);
    config.rgb_output = RgbOutput::Video;
    let settings = SessionSettings::from(&config);

    let pts = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let collected = pts.clone();
    let session = DatasetSession::start_with_sink(
        &settings,
        "2000",
        Some(Box::new(move |_path: &Path, w: u32, h: u32| -> encoding::Result<Box<dyn VideoSink>> {
            assert_eq!((w, h), (8, 6));
            Ok(Box::new(CollectingSink { pts: collected.clone(), finished: false }))
        })),
    )
    .unwrap();

    for i in 0..20 {
        session.add(test_frame(i));
    }
    assert_eq!(session.finish(), SessionStatus::AllGood);

    let pts = pts.lock();
    assert_eq!(pts.len(), 10);
    // Every other raw frame is saved, so saved frames sit two ticks apart
    assert_eq!(pts[0], 0);
    assert_eq!(pts[1], 2 * 1_000_000_000 / 60);
    assert_eq!(pts[9], 18 * 1_000_000_000 / 60);

    let layout = session.layout();
    assert_eq!(layout.rgb(), PathBuf::from("attempt_1/2000/rgb.mp4"));
    assert!(!layout.dir().join("rgb_frames").exists());
}

#[cfg(not(feature = "video"))]
#[test]
fn container_output_without_video_support_fails_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path(), FpsDivider::One);
    config.rgb_output = RgbOutput::Video;
    let settings = SessionSettings::from(&config);
    let session = DatasetSession::start(&settings, "3000").unwrap();

    for i in 0..3 {
        session.add(test_frame(i));
    }
    assert_eq!(session.finish(), SessionStatus::EncodingError);

    // The remaining streams are unaffected
    let layout = session.layout();
    assert_eq!(file_count(&layout.absolute(&layout.depth())), 3);
    assert_eq!(line_count(&layout.absolute(&layout.odometry())), 4);
}

#[test]
fn orphaned_sessions_are_recovered_on_next_run() {
    let dir = tempfile::tempdir().unwrap();
    let settings = SessionSettings::from(&test_config(dir.path(), FpsDivider::One));
    let session = DatasetSession::start(&settings, "pre_3000").unwrap();
    session.add(test_frame(0));
    session.finish();

    // Nothing was saved to this store, as if the app died after finish
    let store = SessionDatabase::open_in_memory().unwrap();
    assert_eq!(arcapture_lib::session::reindex_orphans(dir.path(), &store).unwrap(), 1);
    let saved = store.get_session(session.id()).unwrap().unwrap();
    assert_eq!(saved.depth_file_path, PathBuf::from("attempt_1/pre_3000/depth"));
}

#[test]
fn auto_stop_ends_the_session_after_its_duration() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path(), FpsDivider::One);
    config.session_duration_secs = 0.1;
    let store = Arc::new(SessionDatabase::open_in_memory().unwrap());
    let recorder = recorder(&config, vec![1000], store.clone());

    let (tx, rx) = crossbeam_channel::unbounded();
    recorder.set_on_finished(Box::new(move |outcome| {
        let _ = tx.send(outcome.clone());
    }));

    recorder.start_trigger(true).unwrap();
    recorder.on_frame(test_frame(0));
    let outcome = rx.recv_timeout(Duration::from_secs(10)).unwrap();

    let SessionOutcome::Saved(descriptor) = outcome else {
        panic!("expected a saved session, got {:?}", outcome);
    };
    assert!(descriptor.duration_secs > 0.05);
    assert_eq!(store.count_sessions().unwrap(), 1);
}
