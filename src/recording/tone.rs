// Calibration tone playback

/// Plays a looped sine tone during the tone phase
pub trait TonePlayer: Send {
    /// Start looping a tone at `frequency_hz`, replacing any current tone
    fn play(&mut self, frequency_hz: u32) -> anyhow::Result<()>;

    /// Stop the current tone, if any
    fn stop(&mut self);

    /// Frequency currently playing
    fn playing(&self) -> Option<u32>;
}

/// Records what would be played without touching an audio device
#[derive(Debug, Default)]
pub struct SilentTonePlayer {
    current: Option<u32>,
}

impl SilentTonePlayer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TonePlayer for SilentTonePlayer {
    fn play(&mut self, frequency_hz: u32) -> anyhow::Result<()> {
        log::info!("Tone {} Hz (silent player)", frequency_hz);
        self.current = Some(frequency_hz);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(hz) = self.current.take() {
            log::debug!("Tone {} Hz stopped", hz);
        }
    }

    fn playing(&self) -> Option<u32> {
        self.current
    }
}

/// Output amplitude of the generated sine
pub const TONE_AMPLITUDE: f32 = 0.5;

/// Phase-continuous sine generator
#[derive(Debug, Clone)]
pub struct SineOscillator {
    phase: f32,
    step: f32,
}

impl SineOscillator {
    pub fn new(frequency_hz: u32, sample_rate: u32) -> Self {
        Self {
            phase: 0.0,
            step: frequency_hz as f32 / sample_rate.max(1) as f32,
        }
    }

    pub fn next_sample(&mut self) -> f32 {
        let sample = (self.phase * std::f32::consts::TAU).sin() * TONE_AMPLITUDE;
        self.phase = (self.phase + self.step).fract();
        sample
    }

    /// Fill an interleaved buffer, same value on every channel
    pub fn fill(&mut self, data: &mut [f32], channels: usize) {
        for frame in data.chunks_mut(channels.max(1)) {
            let sample = self.next_sample();
            frame.fill(sample);
        }
    }
}

#[cfg(feature = "audio")]
pub use sine::SineTonePlayer;

#[cfg(feature = "audio")]
mod sine {
    use super::{SineOscillator, TonePlayer};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use crossbeam_channel::{bounded, Receiver, Sender};

    /// Commands sent to the playback thread
    enum ToneCommand {
        Play(u32, Sender<anyhow::Result<()>>),
        Stop,
        Shutdown,
    }

    /// Sine tone on the default output device.
    ///
    /// cpal::Stream is not Send, so the stream lives on its own thread and is
    /// driven through a channel.
    pub struct SineTonePlayer {
        commands: Sender<ToneCommand>,
        thread: Option<std::thread::JoinHandle<()>>,
        current: Option<u32>,
    }

    impl SineTonePlayer {
        pub fn new() -> anyhow::Result<Self> {
            let (commands, receiver) = bounded::<ToneCommand>(8);
            let thread = std::thread::Builder::new()
                .name("arcapture-tone".into())
                .spawn(move || playback_thread_main(receiver))?;
            Ok(Self {
                commands,
                thread: Some(thread),
                current: None,
            })
        }
    }

    fn playback_thread_main(receiver: Receiver<ToneCommand>) {
        let mut stream: Option<cpal::Stream> = None;
        while let Ok(command) = receiver.recv() {
            match command {
                ToneCommand::Play(hz, reply) => {
                    stream = None;
                    let result = open_stream(hz).map(|s| {
                        stream = Some(s);
                    });
                    let _ = reply.send(result);
                }
                ToneCommand::Stop => stream = None,
                ToneCommand::Shutdown => break,
            }
        }
        drop(stream);
    }

    fn open_stream(frequency_hz: u32) -> anyhow::Result<cpal::Stream> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow::anyhow!("No default output device"))?;
        let supported = device.default_output_config()?;
        if supported.sample_format() != cpal::SampleFormat::F32 {
            return Err(anyhow::anyhow!(
                "Unsupported output sample format {:?}",
                supported.sample_format()
            ));
        }

        let config: cpal::StreamConfig = supported.into();
        let channels = config.channels as usize;
        let mut oscillator = SineOscillator::new(frequency_hz, config.sample_rate.0);

        let stream = device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                oscillator.fill(data, channels);
            },
            |err| {
                log::error!("Tone output error: {}", err);
            },
            None,
        )?;
        stream.play()?;
        log::info!(
            "Tone {} Hz playing on {} ({} Hz, {} ch)",
            frequency_hz,
            device.name().unwrap_or_else(|_| "unknown device".into()),
            config.sample_rate.0,
            channels
        );
        Ok(stream)
    }

    impl TonePlayer for SineTonePlayer {
        fn play(&mut self, frequency_hz: u32) -> anyhow::Result<()> {
            let (reply, result) = bounded(1);
            self.commands
                .send(ToneCommand::Play(frequency_hz, reply))
                .map_err(|_| anyhow::anyhow!("Tone thread is gone"))?;
            result
                .recv()
                .map_err(|_| anyhow::anyhow!("Tone thread dropped the request"))??;
            self.current = Some(frequency_hz);
            Ok(())
        }

        fn stop(&mut self) {
            if self.current.take().is_some() {
                let _ = self.commands.send(ToneCommand::Stop);
            }
        }

        fn playing(&self) -> Option<u32> {
            self.current
        }
    }

    impl Drop for SineTonePlayer {
        fn drop(&mut self) {
            let _ = self.commands.send(ToneCommand::Shutdown);
            if let Some(handle) = self.thread.take() {
                let _ = handle.join();
            }
        }
    }
}
