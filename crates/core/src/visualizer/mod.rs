use std::{collections::VecDeque, f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use crate::{config::VisualizerConfig, HumSearchError, Result};

/// Turns the most recent microphone samples into a fixed number of bar
/// heights in `[min_height, 1]`.
///
/// The visualizer behaves like a browser analyser node: a Hann-windowed real
/// FFT over a sliding window, magnitudes mapped from decibels to `[0, 1]` and
/// smoothed over time, then averaged into equal-width bands.
pub struct Visualizer {
    config: VisualizerConfig,
    window: VecDeque<f32>,
    smoothed: Vec<f32>,
    fft: FftResources,
}

impl Visualizer {
    pub fn new(config: VisualizerConfig) -> Result<Self> {
        config.validate()?;
        let mut planner = RealFftPlanner::<f32>::new();
        let plan = planner.plan_fft_forward(config.fft_size);
        let fft = FftResources {
            size: config.fft_size,
            scratch: plan.make_scratch_vec(),
            spectrum: plan.make_output_vec(),
            input: plan.make_input_vec(),
            plan,
        };

        Ok(Self {
            window: VecDeque::from(vec![0.0; config.fft_size]),
            smoothed: vec![0.0; config.fft_size / 2],
            config,
            fft,
        })
    }

    pub fn band_count(&self) -> usize {
        self.config.bands
    }

    /// Feeds newly captured samples and returns the current bar heights.
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        self.push(samples);
        self.compute_bands()
    }

    fn push(&mut self, samples: &[f32]) {
        let size = self.config.fft_size;
        let fresh = if samples.len() > size {
            &samples[samples.len() - size..]
        } else {
            samples
        };
        for sample in fresh {
            self.window.pop_front();
            self.window.push_back(*sample);
        }
    }

    fn compute_bands(&mut self) -> Result<Vec<f32>> {
        let len = self.fft.size;
        for (index, value) in self.window.iter().enumerate() {
            self.fft.input[index] = *value * hann_value(index, len);
        }

        self.fft
            .plan
            .process_with_scratch(
                &mut self.fft.input,
                &mut self.fft.spectrum,
                &mut self.fft.scratch,
            )
            .map_err(|err| HumSearchError::msg(format!("visualizer fft failed: {err}")))?;

        let VisualizerConfig {
            bands,
            min_height,
            smoothing,
            min_db,
            max_db,
            ..
        } = self.config;

        // The analyser convention drops the Nyquist bin and scales by 1/N.
        for (level, bin) in self.smoothed.iter_mut().zip(self.fft.spectrum.iter()) {
            let magnitude = bin.norm() / len as f32;
            let decibels = 20.0 * magnitude.max(1e-10).log10();
            let current = ((decibels - min_db) / (max_db - min_db)).clamp(0.0, 1.0);
            *level = *level * smoothing + current * (1.0 - smoothing);
        }

        let per_band = self.smoothed.len() / bands;
        let heights = self
            .smoothed
            .chunks(per_band)
            .take(bands)
            .map(|chunk| {
                let mean = chunk.iter().sum::<f32>() / chunk.len() as f32;
                mean.max(min_height)
            })
            .collect();

        Ok(heights)
    }
}

struct FftResources {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl fmt::Debug for Visualizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Visualizer")
            .field("bands", &self.config.bands)
            .field("fft_size", &self.fft.size)
            .finish()
    }
}

fn hann_value(index: usize, len: usize) -> f32 {
    if len <= 1 {
        return 1.0;
    }

    0.5 - 0.5 * ((2.0 * PI * index as f32) / (len as f32 - 1.0)).cos()
}
