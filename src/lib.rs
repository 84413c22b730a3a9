// ARCapture - AR dataset capture pipeline
// Main library entry point

pub mod capture;
pub mod config;
pub mod encoding;
pub mod recording;
pub mod session;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use capture::{SyntheticConfig, SyntheticSource};
use config::Config;
use recording::{PhaseState, Recorder, RecorderError, SessionOutcome, TonePlayer};
use session::{MetadataStore, SessionDatabase};

/// Extra time allowed for finalization beyond the session duration
const FINALIZE_GRACE: Duration = Duration::from_secs(30);

/// Command-line options for `run`
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Config file to use instead of the default location
    pub config_path: Option<PathBuf>,
    /// Number of trigger presses; defaults to the whole sweep
    pub sessions: Option<usize>,
}

/// Initialize logging; `RUST_LOG` overrides the default `info` filter
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init();
}

fn tone_player(config: &Config) -> Box<dyn TonePlayer> {
    if !config.tone_enabled {
        return Box::new(recording::SilentTonePlayer::new());
    }

    #[cfg(feature = "audio")]
    {
        match recording::SineTonePlayer::new() {
            Ok(player) => return Box::new(player),
            Err(e) => log::warn!("Tone playback unavailable ({}), continuing silently", e),
        }
    }

    Box::new(recording::SilentTonePlayer::new())
}

/// Run a calibration sweep against the synthetic source
pub fn run(options: RunOptions) -> anyhow::Result<()> {
    init_logging();

    let config = match &options.config_path {
        Some(path) => Config::load_from_or_default(path),
        None => Config::load_or_default(),
    };
    log::info!("Storage: {:?}, attempt {}", config.storage_path, config.attempt_number);

    let store = Arc::new(SessionDatabase::open_or_in_memory(&session::default_database_path())?);
    match session::reindex_orphans(&config.storage_path, store.as_ref()) {
        Ok(0) => {}
        Ok(n) => log::info!("Re-indexed {} session(s) missing from the database", n),
        Err(e) => log::warn!("Failed to scan for orphaned sessions: {}", e),
    }

    let frequencies = config.frequency_sweep.frequencies();
    let total_steps = frequencies.len() * 3;
    let sessions = options.sessions.unwrap_or(total_steps).min(total_steps);

    let recorder = Recorder::new(&config, PhaseState::new(frequencies), store.clone(), tone_player(&config));
    let (done_tx, done_rx) = crossbeam_channel::unbounded::<SessionOutcome>();
    recorder.set_on_finished(Box::new(move |outcome| {
        let _ = done_tx.send(outcome.clone());
    }));

    let mut source = SyntheticSource::new(SyntheticConfig::default());
    source.start(Arc::new(recorder.clone()))?;

    let (mut saved, mut failed) = (0usize, 0usize);
    for _ in 0..sessions {
        let step = match recorder.start_trigger(true) {
            Ok(Some(step)) => step,
            Ok(None) | Err(RecorderError::SequenceComplete) => break,
            Err(e) => {
                source.stop();
                return Err(e.into());
            }
        };
        log::info!("Recording '{}' for {:?}", step.label, config.session_duration());

        let outcome = match done_rx.recv_timeout(config.session_duration() + FINALIZE_GRACE) {
            Ok(outcome) => outcome,
            Err(_) => {
                log::warn!("Auto-stop did not fire for '{}', stopping manually", step.label);
                recorder.stop()?
            }
        };
        match outcome {
            SessionOutcome::Saved(_) => saved += 1,
            SessionOutcome::Unsaved(d) => {
                log::warn!("'{}' recorded but not indexed", d.name);
                saved += 1;
            }
            SessionOutcome::Failed(status) => {
                log::error!("'{}' failed: {:?}", step.label, status);
                failed += 1;
            }
        }
    }

    source.stop();
    log::info!(
        "Done: {} saved, {} failed, {} sessions in the database",
        saved,
        failed,
        store.count_sessions()?
    );
    Ok(())
}
