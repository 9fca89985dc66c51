//! Radio abstraction and a simulated front-end
//!
//! The server only needs two things from a radio: blocks of samples and a
//! way to apply parameter changes. [`RadioControl`] is the second half. The
//! first half is the sample sink handed to [`SimulatedRadio::new`].

use parking_lot::Mutex;
use rtltcp_proto::IqSample;
use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Highest sample rate the simulated front-end accepts (Hz)
pub const MAX_SAMPLE_RATE: u32 = 61_440_000;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RadioError {
    #[error("Invalid sample rate: {0} Hz")]
    InvalidSampleRate(u32),

    #[error("Invalid gain: {0} dB")]
    InvalidGain(f32),

    #[error("Failed to start sample producer: {0}")]
    Producer(String),
}

pub type Result<T> = std::result::Result<T, RadioError>;

/// Parameter changes the command dispatcher can request
pub trait RadioControl: Send + Sync {
    fn set_center_frequency(&self, hz: u32) -> Result<()>;

    /// Takes effect from the next block. Must not block the caller.
    fn set_sample_rate(&self, hz: u32) -> Result<()>;

    fn set_gain_db(&self, db: f32) -> Result<()>;

    fn set_manual_gain(&self, manual: bool) -> Result<()>;

    fn set_agc(&self, enabled: bool) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadioSettings {
    pub center_frequency: u32,
    pub sample_rate: u32,
    pub gain_db: f32,
    pub manual_gain: bool,
    pub agc: bool,
}

impl Default for RadioSettings {
    fn default() -> Self {
        Self {
            center_frequency: 100_000_000,
            sample_rate: 2_048_000,
            gain_db: 0.0,
            manual_gain: false,
            agc: false,
        }
    }
}

type SampleSink = Arc<dyn Fn(&[IqSample]) + Send + Sync>;

struct Producer {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Flags the producer thread polls between blocks and while pacing
struct Signals {
    stop: Arc<AtomicBool>,
    retune: Arc<AtomicBool>,
}

impl Signals {
    fn interrupted(&self) -> bool {
        self.stop.load(Ordering::Acquire) || self.retune.load(Ordering::Acquire)
    }
}

/// Test-tone generator paced at the configured sample rate
///
/// Stands in for real hardware: a producer thread emits blocks of a complex
/// tone at `tone_offset_hz` from the centre frequency. Amplitude follows the
/// gain setting so clients can see gain commands take effect.
pub struct SimulatedRadio {
    settings: Arc<Mutex<RadioSettings>>,
    block_size: usize,
    tone_offset_hz: f32,
    sink: SampleSink,
    retune: Arc<AtomicBool>,
    producer: Mutex<Option<Producer>>,
}

impl SimulatedRadio {
    pub fn new<F>(settings: RadioSettings, block_size: usize, tone_offset_hz: f32, sink: F) -> Self
    where
        F: Fn(&[IqSample]) + Send + Sync + 'static,
    {
        Self {
            settings: Arc::new(Mutex::new(settings)),
            block_size: block_size.max(1),
            tone_offset_hz,
            sink: Arc::new(sink),
            retune: Arc::new(AtomicBool::new(false)),
            producer: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> RadioSettings {
        *self.settings.lock()
    }

    pub fn is_running(&self) -> bool {
        self.producer.lock().is_some()
    }

    /// Start the producer thread. No-op if already running.
    pub fn start(&self) -> Result<()> {
        let mut producer = self.producer.lock();
        if producer.is_some() {
            return Ok(());
        }

        let rate = self.settings.lock().sample_rate;
        validate_sample_rate(rate)?;

        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let signals = Signals {
                stop: Arc::clone(&stop),
                retune: Arc::clone(&self.retune),
            };
            let settings = Arc::clone(&self.settings);
            let sink = Arc::clone(&self.sink);
            let block_size = self.block_size;
            let tone_offset_hz = self.tone_offset_hz;

            std::thread::Builder::new()
                .name("simulated-radio".to_string())
                .spawn(move || produce(signals, settings, sink, block_size, tone_offset_hz))
                .map_err(|e| RadioError::Producer(e.to_string()))?
        };

        info!("Simulated radio started at {} S/s", rate);
        *producer = Some(Producer { stop, handle });
        Ok(())
    }

    /// Stop the producer thread and wait for it. No-op if not running.
    ///
    /// The thread is woken from its pacing sleep, so this returns after at
    /// most one block of work.
    pub fn stop(&self) {
        let producer = self.producer.lock().take();
        if let Some(producer) = producer {
            producer.stop.store(true, Ordering::Release);
            producer.handle.thread().unpark();
            if producer.handle.join().is_err() {
                warn!("Sample producer thread panicked");
            }
            debug!("Simulated radio stopped");
        }
    }
}

impl RadioControl for SimulatedRadio {
    fn set_center_frequency(&self, hz: u32) -> Result<()> {
        self.settings.lock().center_frequency = hz;
        Ok(())
    }

    /// Restarts the producer's pacing at the new rate without joining the
    /// thread, so this is safe to call from an async worker.
    fn set_sample_rate(&self, hz: u32) -> Result<()> {
        validate_sample_rate(hz)?;

        self.settings.lock().sample_rate = hz;
        self.retune.store(true, Ordering::Release);
        if let Some(producer) = self.producer.lock().as_ref() {
            producer.handle.thread().unpark();
        }
        Ok(())
    }

    fn set_gain_db(&self, db: f32) -> Result<()> {
        if !db.is_finite() || db < 0.0 {
            return Err(RadioError::InvalidGain(db));
        }
        let mut settings = self.settings.lock();
        settings.gain_db = db;
        settings.manual_gain = true;
        Ok(())
    }

    fn set_manual_gain(&self, manual: bool) -> Result<()> {
        self.settings.lock().manual_gain = manual;
        Ok(())
    }

    fn set_agc(&self, enabled: bool) -> Result<()> {
        self.settings.lock().agc = enabled;
        Ok(())
    }
}

impl Drop for SimulatedRadio {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Sample rates the producer can pace at
pub fn validate_sample_rate(hz: u32) -> Result<()> {
    if hz == 0 || hz > MAX_SAMPLE_RATE {
        return Err(RadioError::InvalidSampleRate(hz));
    }
    Ok(())
}

/// Tone amplitude for a gain setting: 0 dB is faint, 50 dB and up is full scale
fn amplitude_for(settings: &RadioSettings) -> f32 {
    if settings.manual_gain {
        (0.05 * 10f32.powf(settings.gain_db / 40.0)).min(1.0)
    } else {
        0.5
    }
}

fn produce(
    signals: Signals,
    settings: Arc<Mutex<RadioSettings>>,
    sink: SampleSink,
    block_size: usize,
    tone_offset_hz: f32,
) {
    let mut block = vec![IqSample::new(0.0, 0.0); block_size];
    let mut phase = 0.0f32;
    let mut next_deadline = Instant::now();

    while !signals.stop.load(Ordering::Acquire) {
        if signals.retune.swap(false, Ordering::AcqRel) {
            debug!("Sample rate changed, restarting block pacing");
            next_deadline = Instant::now();
        }

        let current = *settings.lock();
        let amplitude = amplitude_for(&current);
        let step = TAU * tone_offset_hz / current.sample_rate as f32;

        for sample in block.iter_mut() {
            *sample = IqSample::from_polar(amplitude, phase);
            phase = (phase + step) % TAU;
        }
        sink(&block);

        // Pace to real time
        next_deadline += Duration::from_secs_f64(block_size as f64 / current.sample_rate as f64);
        let now = Instant::now();
        if next_deadline > now {
            pace_until(next_deadline, &signals);
        } else {
            next_deadline = now;
        }
    }
}

/// Park until `deadline`, returning early on stop or retune
fn pace_until(deadline: Instant, signals: &Signals) {
    loop {
        if signals.interrupted() {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::park_timeout(deadline - now);
    }
}
