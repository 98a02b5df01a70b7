use std::f64::consts::TAU;

use serde::{Deserialize, Serialize};

use crate::{Result, TermToneError};

/// Attack applied by the [`ToneEnvelope::note`] and [`ToneEnvelope::sweep`]
/// builders to avoid clicks.
pub const ATTACK_SECONDS: f64 = 0.003;
pub const RELEASE_SECONDS: f64 = 0.005;

/// Amplitudes of the harmonic series for a custom periodic waveform. Entry
/// `n` is the amplitude of harmonic `n + 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarmonicTable {
    pub amplitudes: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Waveform {
    Sine,
    Square,
    Sawtooth,
    Triangle,
    Custom(HarmonicTable),
}

impl Waveform {
    /// Evaluates one period of the waveform; `phase` is in cycles.
    pub fn sample(&self, phase: f64) -> f32 {
        let phase = phase.rem_euclid(1.0);
        match self {
            Waveform::Sine => (TAU * phase).sin() as f32,
            Waveform::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Sawtooth => (2.0 * phase - 1.0) as f32,
            Waveform::Triangle => (1.0 - 4.0 * (phase - 0.5).abs()) as f32,
            Waveform::Custom(table) => {
                let norm: f32 = table.amplitudes.iter().map(|a| a.abs()).sum();
                if norm <= f32::EPSILON {
                    return 0.0;
                }
                let sum: f64 = table
                    .amplitudes
                    .iter()
                    .enumerate()
                    .map(|(n, a)| *a as f64 * (TAU * (n + 1) as f64 * phase).sin())
                    .sum();
                (sum / norm as f64) as f32
            }
        }
    }
}

/// Automation point: reach `value` at absolute device time `time`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RampTarget {
    pub value: f32,
    pub time: f64,
}

impl RampTarget {
    pub fn new(value: f32, time: f64) -> Self {
        Self { value, time }
    }
}

/// Description of one tone: oscillator settings plus gain (and optional
/// frequency) automation in absolute device time.
///
/// The first gain target is applied as an immediate set, the rest as linear
/// ramps. The tone stops at the latest target time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToneEnvelope {
    pub waveform: Waveform,
    pub frequency: f32,
    pub start_time: f64,
    pub gain_ramps: Vec<RampTarget>,
    #[serde(default)]
    pub frequency_ramps: Vec<RampTarget>,
}

impl ToneEnvelope {
    /// Sine note with a short attack, flat sustain and short release.
    pub fn note(frequency: f32, start_time: f64, duration: f64, peak: f32) -> Self {
        Self {
            waveform: Waveform::Sine,
            frequency,
            start_time,
            gain_ramps: click_free_gain(start_time, duration, peak),
            frequency_ramps: Vec::new(),
        }
    }

    /// Note whose pitch glides linearly from `from` to `to`.
    pub fn sweep(from: f32, to: f32, start_time: f64, duration: f64, peak: f32) -> Self {
        let mut envelope = Self::note(from, start_time, duration, peak);
        envelope
            .frequency_ramps
            .push(RampTarget::new(to, start_time + duration));
        envelope
    }

    pub fn with_waveform(mut self, waveform: Waveform) -> Self {
        self.waveform = waveform;
        self
    }

    /// Time at which the source is stopped.
    pub fn end_time(&self) -> f64 {
        self.gain_ramps
            .iter()
            .chain(self.frequency_ramps.iter())
            .map(|ramp| ramp.time)
            .fold(self.start_time, f64::max)
    }

    pub fn duration(&self) -> f64 {
        self.end_time() - self.start_time
    }

    /// Checks everything the device would otherwise choke on.
    pub fn validate(&self) -> Result<()> {
        if !(self.frequency.is_finite() && self.frequency > 0.0) {
            return Err(TermToneError::envelope(format!(
                "frequency must be positive, got {}",
                self.frequency
            )));
        }
        if !(self.start_time.is_finite() && self.start_time >= 0.0) {
            return Err(TermToneError::envelope("start time must be a non-negative number"));
        }
        if let Waveform::Custom(table) = &self.waveform {
            if table.amplitudes.is_empty() || table.amplitudes.iter().any(|a| !a.is_finite()) {
                return Err(TermToneError::envelope("custom waveform needs finite harmonics"));
            }
        }
        if self.gain_ramps.is_empty() {
            return Err(TermToneError::envelope("gain envelope has no targets"));
        }

        check_ramps("gain", &self.gain_ramps, self.start_time, |value| value >= 0.0)?;
        check_ramps("frequency", &self.frequency_ramps, self.start_time, |value| {
            value > 0.0
        })?;

        if self.end_time() <= self.start_time {
            return Err(TermToneError::envelope("envelope must end after it starts"));
        }
        Ok(())
    }
}

fn check_ramps(
    name: &str,
    ramps: &[RampTarget],
    start_time: f64,
    value_ok: impl Fn(f32) -> bool,
) -> Result<()> {
    let mut previous = start_time;
    for (index, ramp) in ramps.iter().enumerate() {
        if !ramp.time.is_finite() || !ramp.value.is_finite() || !value_ok(ramp.value) {
            return Err(TermToneError::envelope(format!(
                "{name} target {index} is out of range"
            )));
        }
        if ramp.time < previous {
            return Err(TermToneError::envelope(format!(
                "{name} target {index} at {:.3}s precedes {:.3}s",
                ramp.time, previous
            )));
        }
        previous = ramp.time;
    }
    Ok(())
}

fn click_free_gain(start: f64, duration: f64, peak: f32) -> Vec<RampTarget> {
    let end = start + duration;
    if duration > ATTACK_SECONDS + RELEASE_SECONDS {
        vec![
            RampTarget::new(0.0, start),
            RampTarget::new(peak, start + ATTACK_SECONDS),
            RampTarget::new(peak, end - RELEASE_SECONDS),
            RampTarget::new(0.0, end),
        ]
    } else {
        vec![
            RampTarget::new(0.0, start),
            RampTarget::new(peak, start + duration / 2.0),
            RampTarget::new(0.0, end),
        ]
    }
}
