// Trigger surface: phase sequencing, auto-stop and session finalization

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};

use super::dataset::{DatasetSession, SessionError, SessionSettings};
use super::phase::{PhaseSequencer, PhaseState, PhaseStep};
use super::tone::TonePlayer;
use super::RecordingStatus;
use crate::capture::{CaptureSink, Frame, Vec3};
use crate::config::Config;
use crate::encoding::SessionStatus;
use crate::session::{ordinal_name, MetadataStore, SessionDescriptor};

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("A session is already active ({0:?})")]
    SessionActive(RecordingStatus),

    #[error("Calibration sweep is complete")]
    SequenceComplete,

    #[error("No session is recording")]
    NotRecording,

    #[error("Session setup failed: {0}")]
    Setup(#[from] SessionError),
}

/// Result of finalizing one session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome {
    /// Recorded cleanly and saved to the metadata store
    Saved(SessionDescriptor),
    /// Recorded cleanly, but the store rejected the descriptor. The session
    /// directory keeps its manifest and can be re-indexed later.
    Unsaved(SessionDescriptor),
    /// Something failed; nothing was saved
    Failed(SessionStatus),
}

/// Called after every finalization, whatever the outcome
pub type FinishedCallback = Box<dyn Fn(&SessionOutcome) + Send + Sync>;

struct ActiveSession {
    session: Arc<DatasetSession>,
    /// Dropping this cancels the auto-stop timer
    _cancel_auto_stop: Sender<()>,
}

struct RecorderInner {
    settings: SessionSettings,
    tone_enabled: bool,
    session_duration: Duration,
    status: RwLock<RecordingStatus>,
    sequencer: Mutex<PhaseSequencer>,
    active: RwLock<Option<ActiveSession>>,
    tone: Mutex<Box<dyn TonePlayer>>,
    store: Arc<dyn MetadataStore>,
    on_finished: RwLock<Option<FinishedCallback>>,
}

/// Drives calibration sessions from trigger presses.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Recorder {
    inner: Arc<RecorderInner>,
}

impl Recorder {
    pub fn new(
        config: &Config,
        phase_state: PhaseState,
        store: Arc<dyn MetadataStore>,
        tone: Box<dyn TonePlayer>,
    ) -> Self {
        Self {
            inner: Arc::new(RecorderInner {
                settings: SessionSettings::from(config),
                tone_enabled: config.tone_enabled,
                session_duration: config.session_duration(),
                status: RwLock::new(RecordingStatus::Idle),
                sequencer: Mutex::new(PhaseSequencer::new(phase_state)),
                active: RwLock::new(None),
                tone: Mutex::new(tone),
                store,
                on_finished: RwLock::new(None),
            }),
        }
    }

    /// Register the callback run after every finalization
    pub fn set_on_finished(&self, callback: FinishedCallback) {
        *self.inner.on_finished.write() = Some(callback);
    }

    pub fn status(&self) -> RecordingStatus {
        *self.inner.status.read()
    }

    pub fn phase_state(&self) -> PhaseState {
        self.inner.sequencer.lock().state().clone()
    }

    /// Put the sequencer back to the first PRE step
    pub fn reset_phases(&self) {
        self.inner.sequencer.lock().state_mut().reset();
    }

    pub fn active_session(&self) -> Option<Arc<DatasetSession>> {
        self.inner.active.read().as_ref().map(|a| Arc::clone(&a.session))
    }

    /// Handle a trigger press. Release events are ignored and return `Ok(None)`.
    ///
    /// Starts the next phase's session and its auto-stop timer. Fails without
    /// advancing the sequencer if a session is still active.
    pub fn start_trigger(&self, pressed: bool) -> Result<Option<PhaseStep>, RecorderError> {
        if !pressed {
            return Ok(None);
        }
        let inner = &self.inner;

        let mut status = inner.status.write();
        if !status.can_start_recording() {
            return Err(RecorderError::SessionActive(*status));
        }

        let step = {
            let mut sequencer = inner.sequencer.lock();
            let step = sequencer.peek().ok_or(RecorderError::SequenceComplete)?;
            let session = DatasetSession::start(&inner.settings, &step.label)?;
            sequencer.on_trigger(true);

            let cancel = self.spawn_auto_stop(session.id().to_string());
            *inner.active.write() = Some(ActiveSession { session, _cancel_auto_stop: cancel });
            step
        };

        if inner.tone_enabled && step.tone_hz != 0 {
            if let Err(e) = inner.tone.lock().play(step.tone_hz) {
                log::warn!("Failed to start {} Hz tone: {}", step.tone_hz, e);
            }
        }

        *status = RecordingStatus::Recording;
        Ok(Some(step))
    }

    fn spawn_auto_stop(&self, session_id: String) -> Sender<()> {
        let (cancel, cancelled) = bounded::<()>(1);
        let recorder = self.clone();
        let duration = self.inner.session_duration;

        let spawned = std::thread::Builder::new()
            .name("arcapture-auto-stop".into())
            .spawn(move || {
                if let Err(RecvTimeoutError::Timeout) = cancelled.recv_timeout(duration) {
                    log::info!("Session {} reached {:?}, stopping", session_id, duration);
                    if let Err(e) = recorder.stop_session(Some(&session_id)) {
                        log::debug!("Auto-stop skipped: {}", e);
                    }
                }
            });
        if let Err(e) = spawned {
            log::error!("Failed to spawn auto-stop thread: {}; stop the session manually", e);
        }
        cancel
    }

    /// Stop the active session now and finalize it
    pub fn stop(&self) -> Result<SessionOutcome, RecorderError> {
        self.stop_session(None)
    }

    fn stop_session(&self, expected_id: Option<&str>) -> Result<SessionOutcome, RecorderError> {
        let inner = &self.inner;

        let active = {
            let mut status = inner.status.write();
            if *status != RecordingStatus::Recording {
                return Err(RecorderError::NotRecording);
            }
            let mut active = inner.active.write();
            if let (Some(expected), Some(current)) = (expected_id, active.as_ref()) {
                if current.session.id() != expected {
                    return Err(RecorderError::NotRecording);
                }
            }
            let Some(taken) = active.take() else {
                return Err(RecorderError::NotRecording);
            };
            *status = RecordingStatus::Finalizing;
            taken
        };
        let ActiveSession { session, _cancel_auto_stop: cancel } = active;
        drop(cancel);

        inner.tone.lock().stop();

        let status = session.finish();
        let outcome = self.finalize(&session, status);

        *inner.status.write() = RecordingStatus::Idle;

        if let Some(callback) = inner.on_finished.read().as_ref() {
            callback(&outcome);
        }
        Ok(outcome)
    }

    fn finalize(&self, session: &DatasetSession, status: SessionStatus) -> SessionOutcome {
        if !status.is_all_good() {
            log::error!(
                "Session {} ({}) failed with {:?}; not saved",
                session.id(),
                session.label(),
                status
            );
            return SessionOutcome::Failed(status);
        }

        let store = &self.inner.store;
        let prior = store.count_sessions().unwrap_or_else(|e| {
            log::warn!("Failed to count sessions: {}", e);
            0
        });
        let descriptor = session.descriptor(ordinal_name(prior));

        match store.save_session(&descriptor) {
            Ok(()) => {
                log::info!(
                    "Saved '{}' ({:.2}s) from {:?}",
                    descriptor.name,
                    descriptor.duration_secs,
                    session.layout().dir()
                );
                SessionOutcome::Saved(descriptor)
            }
            Err(e) => {
                log::error!("Failed to save session {}: {}", descriptor.id, e);
                SessionOutcome::Unsaved(descriptor)
            }
        }
    }
}

impl CaptureSink for Recorder {
    fn on_frame(&self, frame: Frame) {
        if let Some(session) = self.active_session() {
            session.add(frame);
        }
    }

    fn on_accelerometer(&self, value: Vec3, timestamp: f64) {
        if let Some(session) = self.active_session() {
            session.on_accelerometer(value, timestamp);
        }
    }

    fn on_gyroscope(&self, value: Vec3, timestamp: f64) {
        if let Some(session) = self.active_session() {
            session.on_gyroscope(value, timestamp);
        }
    }
}
