use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use crate::{Result, TermToneError};

/// Level and spectral measurements for a block of rendered audio.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignalReport {
    pub duration_seconds: f32,
    pub rms: f32,
    pub peak: f32,
    /// Centre frequency of the strongest FFT bin.
    pub dominant_hz: f32,
    pub spectral_centroid_hz: f32,
}

/// FFT-backed meter used to check what the audio engine actually produced.
/// Plans are cached per block size so repeated measurements stay cheap.
pub struct SignalAnalyzer {
    sample_rate: u32,
    fft_planner: RealFftPlanner<f32>,
    fft: Option<FftResources>,
}

impl SignalAnalyzer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            fft_planner: RealFftPlanner::new(),
            fft: None,
        }
    }

    /// Returns the sample rate associated with the analyzer.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn analyze(&mut self, samples: &[f32]) -> Result<SignalReport> {
        if samples.len() < 2 {
            return Err(TermToneError::msg("analysis requires blocks with at least two samples"));
        }

        let sample_rate = self.sample_rate as f32;
        let rms = compute_rms(samples);
        let peak = samples.iter().fold(0.0_f32, |max, s| max.max(s.abs()));
        let (dominant_hz, spectral_centroid_hz) = self.compute_spectrum(samples)?;

        Ok(SignalReport {
            duration_seconds: samples.len() as f32 / sample_rate,
            rms,
            peak,
            dominant_hz,
            spectral_centroid_hz,
        })
    }

    fn compute_spectrum(&mut self, samples: &[f32]) -> Result<(f32, f32)> {
        let len = samples.len();
        let sample_rate = self.sample_rate as f32;
        let fft = self.prepare_fft(len);

        for (index, value) in samples.iter().enumerate() {
            fft.input[index] = *value * hann_value(index, len);
        }

        fft.plan
            .process_with_scratch(&mut fft.input, &mut fft.spectrum, &mut fft.scratch)
            .map_err(|err| TermToneError::msg(format!("fft failed: {err}")))?;

        let bin_hz = sample_rate / len as f32;
        let mut magnitude_sum = 0.0;
        let mut weighted_sum = 0.0;
        let mut strongest = (0, 0.0_f32);

        for (i, bin) in fft.spectrum.iter().enumerate() {
            let magnitude = bin.norm();
            magnitude_sum += magnitude;
            weighted_sum += magnitude * (i as f32 * bin_hz);
            if magnitude > strongest.1 {
                strongest = (i, magnitude);
            }
        }

        if magnitude_sum <= f32::EPSILON {
            Ok((0.0, 0.0))
        } else {
            Ok((strongest.0 as f32 * bin_hz, weighted_sum / magnitude_sum))
        }
    }

    fn prepare_fft(&mut self, size: usize) -> &mut FftResources {
        let planner = &mut self.fft_planner;
        let fft = self.fft.get_or_insert_with(|| FftResources::plan(planner, size));
        if fft.size != size {
            *fft = FftResources::plan(planner, size);
        }
        fft
    }
}

struct FftResources {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl FftResources {
    fn plan(planner: &mut RealFftPlanner<f32>, size: usize) -> Self {
        let plan = planner.plan_fft_forward(size);
        Self {
            size,
            scratch: plan.make_scratch_vec(),
            spectrum: plan.make_output_vec(),
            input: plan.make_input_vec(),
            plan,
        }
    }
}

impl fmt::Debug for SignalAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalAnalyzer")
            .field("sample_rate", &self.sample_rate)
            .field("fft", &self.fft)
            .finish()
    }
}

impl fmt::Debug for FftResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftResources")
            .field("size", &self.size)
            .finish()
    }
}

fn compute_rms(samples: &[f32]) -> f32 {
    let sum: f32 = samples.iter().map(|sample| sample * sample).sum();
    (sum / samples.len() as f32).sqrt()
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}
