// Synthetic frame source: a moving test pattern and a slowly rotating IMU
//
// Stands in for the camera and motion sensors when running on a machine
// without them. Each sensor gets its own thread, like the real callbacks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{CaptureSink, ConfidenceMap, DepthMap, Frame, Intrinsics, Pose, RgbImage, Vec3};

#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub width: u32,
    pub height: u32,
    pub camera_fps: u32,
    pub depth_width: u32,
    pub depth_height: u32,
    /// Frames delivered without depth before the depth sensor "warms up"
    pub depth_warmup_frames: usize,
    pub imu_hz: u32,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            width: 192,
            height: 144,
            camera_fps: 60,
            depth_width: 64,
            depth_height: 48,
            depth_warmup_frames: 0,
            imu_hz: 100,
        }
    }
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    stop_flag: Arc<AtomicBool>,
    handles: Vec<std::thread::JoinHandle<()>>,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            stop_flag: Arc::new(AtomicBool::new(false)),
            handles: Vec::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        !self.handles.is_empty()
    }

    /// Start the camera, accelerometer and gyroscope threads
    pub fn start(&mut self, sink: Arc<dyn CaptureSink>) -> anyhow::Result<()> {
        if self.is_running() {
            return Ok(());
        }
        self.stop_flag.store(false, Ordering::SeqCst);
        let epoch = Instant::now();

        let camera = {
            let sink = sink.clone();
            let stop = self.stop_flag.clone();
            let config = self.config.clone();
            std::thread::Builder::new()
                .name("arcapture-camera".into())
                .spawn(move || camera_loop(&config, epoch, &stop, sink.as_ref()))?
        };
        self.handles.push(camera);

        let period = Duration::from_secs_f64(1.0 / self.config.imu_hz.max(1) as f64);
        for (name, gyro) in [("arcapture-accelerometer", false), ("arcapture-gyroscope", true)] {
            let sink = sink.clone();
            let stop = self.stop_flag.clone();
            let handle = std::thread::Builder::new().name(name.into()).spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    let t = epoch.elapsed().as_secs_f64();
                    if gyro {
                        sink.on_gyroscope(Vec3::new(0.0, 0.2 * (t * 0.5).cos(), 0.0), t);
                    } else {
                        sink.on_accelerometer(Vec3::new(0.02 * t.sin(), -1.0, 0.0), t);
                    }
                    std::thread::sleep(period);
                }
            })?;
            self.handles.push(handle);
        }

        log::info!(
            "Synthetic source started: {}x{} @ {} fps, IMU @ {} Hz",
            self.config.width,
            self.config.height,
            self.config.camera_fps,
            self.config.imu_hz
        );
        Ok(())
    }

    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                log::error!("Synthetic source thread panicked");
            }
        }
    }
}

impl Drop for SyntheticSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn camera_loop(config: &SyntheticConfig, epoch: Instant, stop: &AtomicBool, sink: &dyn CaptureSink) {
    let period = Duration::from_secs_f64(1.0 / config.camera_fps.max(1) as f64);
    let mut next = Instant::now();
    let mut index = 0usize;

    while !stop.load(Ordering::SeqCst) {
        let t = epoch.elapsed().as_secs_f64();
        sink.on_frame(synthetic_frame(config, index, t));
        index += 1;

        // Fixed-rate schedule; if we fall behind, carry on without sleeping
        next += period;
        if let Some(wait) = next.checked_duration_since(Instant::now()) {
            std::thread::sleep(wait);
        }
    }
}

/// Build the `index`-th frame of the test pattern
pub fn synthetic_frame(config: &SyntheticConfig, index: usize, timestamp: f64) -> Frame {
    let (w, h) = (config.width, config.height);
    let shift = (index * 2) as u32;
    let mut data = Vec::with_capacity((w * h * 3) as usize);
    for y in 0..h {
        for x in 0..w {
            data.push(((x + shift) % 256) as u8);
            data.push(((y * 255) / h.max(1)) as u8);
            data.push((index % 256) as u8);
        }
    }

    let has_depth = index >= config.depth_warmup_frames;
    let (dw, dh) = (config.depth_width, config.depth_height);
    let depth = has_depth.then(|| DepthMap {
        width: dw,
        height: dh,
        data: (0..dw * dh)
            .map(|i| 0.5 + (i % dw) as f32 / dw.max(1) as f32 * 3.0)
            .collect(),
    });
    let confidence = has_depth.then(|| ConfidenceMap {
        width: dw,
        height: dh,
        data: (0..dw * dh).map(|i| ((i / dw.max(1)) % 3) as u8).collect(),
    });

    let mut pose = Pose::identity();
    pose.matrix[0][3] = 0.01 * index as f64;
    pose.matrix[2][3] = -0.5;

    Frame {
        timestamp,
        image: RgbImage { width: w, height: h, data },
        depth,
        confidence,
        pose,
        intrinsics: Intrinsics::new(w as f64 * 1.2, w as f64 * 1.2, w as f64 / 2.0, h as f64 / 2.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Counting {
        frames: Mutex<usize>,
        accel: Mutex<usize>,
        gyro: Mutex<usize>,
    }

    impl CaptureSink for Counting {
        fn on_frame(&self, frame: Frame) {
            assert!(frame.image.is_well_formed());
            *self.frames.lock() += 1;
        }
        fn on_accelerometer(&self, _: Vec3, _: f64) {
            *self.accel.lock() += 1;
        }
        fn on_gyroscope(&self, _: Vec3, _: f64) {
            *self.gyro.lock() += 1;
        }
    }

    #[test]
    fn test_frames_are_well_formed_and_warm_up_depth() {
        let config = SyntheticConfig { depth_warmup_frames: 2, ..SyntheticConfig::default() };
        let first = synthetic_frame(&config, 0, 0.0);
        assert!(first.image.is_well_formed());
        assert!(first.depth.is_none());

        let later = synthetic_frame(&config, 5, 0.1);
        assert!(later.depth.as_ref().unwrap().is_well_formed());
        assert!(later.confidence.as_ref().unwrap().is_well_formed());
        assert!((later.pose.matrix[0][3] - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_source_delivers_on_all_three_paths() {
        let sink = Arc::new(Counting::default());
        let mut source = SyntheticSource::new(SyntheticConfig {
            width: 8,
            height: 6,
            depth_width: 4,
            depth_height: 3,
            ..SyntheticConfig::default()
        });
        source.start(sink.clone()).unwrap();
        std::thread::sleep(Duration::from_millis(200));
        source.stop();
        assert!(!source.is_running());

        assert!(*sink.frames.lock() > 0);
        assert!(*sink.accel.lock() > 0);
        assert!(*sink.gyro.lock() > 0);
    }
}
