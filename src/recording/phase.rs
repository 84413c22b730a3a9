// Calibration phase sequencer
//
// Each frequency in the sweep is recorded three times: silence before, the
// tone itself, silence after. One trigger press moves one step.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Silence before the tone
    Pre,
    /// Tone playing
    During,
    /// Silence after the tone
    Post,
}

impl Phase {
    fn next(self) -> Phase {
        match self {
            Phase::Pre => Phase::During,
            Phase::During => Phase::Post,
            Phase::Post => Phase::Pre,
        }
    }

    /// Directory label for this phase at `frequency_hz`
    pub fn label(self, frequency_hz: u32) -> String {
        match self {
            Phase::Pre => format!("pre_{}", frequency_hz),
            Phase::During => frequency_hz.to_string(),
            Phase::Post => format!("post_{}", frequency_hz),
        }
    }
}

/// Sequencer position. Lives for the whole run and is handed to the
/// sequencer explicitly; nothing resets it except `reset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseState {
    phase: Phase,
    index: usize,
    frequencies: Vec<u32>,
}

impl PhaseState {
    pub fn new(frequencies: Vec<u32>) -> Self {
        Self {
            phase: Phase::Pre,
            index: 0,
            frequencies,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn frequencies(&self) -> &[u32] {
        &self.frequencies
    }

    /// Frequency at the current index, or None once the sweep is done
    pub fn current_frequency(&self) -> Option<u32> {
        self.frequencies.get(self.index).copied()
    }

    pub fn is_complete(&self) -> bool {
        self.index >= self.frequencies.len()
    }

    /// Back to PRE at the first frequency
    pub fn reset(&mut self) {
        self.phase = Phase::Pre;
        self.index = 0;
    }
}

/// What the recorder should do for one trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseStep {
    pub phase: Phase,
    /// Sweep entry this step belongs to
    pub frequency_hz: u32,
    /// Tone to play during the session; 0 is silence
    pub tone_hz: u32,
    /// Session directory name
    pub label: String,
}

pub struct PhaseSequencer {
    state: PhaseState,
}

impl PhaseSequencer {
    pub fn new(state: PhaseState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &PhaseState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut PhaseState {
        &mut self.state
    }

    /// The step the next trigger would produce, without advancing
    pub fn peek(&self) -> Option<PhaseStep> {
        let frequency_hz = self.state.current_frequency()?;
        let phase = self.state.phase;
        let tone_hz = match phase {
            Phase::During => frequency_hz,
            Phase::Pre | Phase::Post => 0,
        };
        Some(PhaseStep {
            phase,
            frequency_hz,
            tone_hz,
            label: phase.label(frequency_hz),
        })
    }

    /// Handle one trigger event. Release events (`pressed == false`) and
    /// triggers after the sweep is complete are ignored.
    pub fn on_trigger(&mut self, pressed: bool) -> Option<PhaseStep> {
        if !pressed {
            return None;
        }
        let step = self.peek()?;

        if step.phase == Phase::Post {
            self.state.index += 1;
        }
        self.state.phase = step.phase.next();

        log::info!(
            "Phase {:?} at {} Hz -> session '{}'",
            step.phase,
            step.frequency_hz,
            step.label
        );
        Some(step)
    }
}
