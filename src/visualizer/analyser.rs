//! Frequency-domain analysis in the style of a Web Audio `AnalyserNode`.

use std::sync::Arc;

use rustfft::{Fft, FftPlanner, num_complex::Complex};

/// One byte per frequency bin, recomputed every tick.
pub type FrequencyFrame = Vec<u8>;

/// Anything that can hand out the current magnitude array on demand.
pub trait FrequencySource {
    fn frequency_frame(&mut self) -> FrequencyFrame;
}

pub struct FrequencyAnalyser {
    fft_size: usize,
    smoothing: f32,
    min_db: f32,
    max_db: f32,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    smoothed: Vec<f32>,
    scratch: Vec<Complex<f32>>,
}

impl FrequencyAnalyser {
    pub const DEFAULT_FFT_SIZE: usize = 256;

    /// `fft_size` is rounded up to a power of two, minimum 32.
    pub fn new(fft_size: usize) -> Self {
        let fft_size = fft_size.max(32).next_power_of_two();
        let fft = FftPlanner::<f32>::new().plan_fft_forward(fft_size);

        // Blackman window
        let n = fft_size as f32;
        let window = (0..fft_size)
            .map(|i| {
                let x = i as f32 / n;
                0.42 - 0.5 * (std::f32::consts::TAU * x).cos() + 0.08 * (2.0 * std::f32::consts::TAU * x).cos()
            })
            .collect();

        Self {
            fft_size,
            smoothing: 0.8,
            min_db: -100.0,
            max_db: -30.0,
            fft,
            window,
            smoothed: vec![0.0; fft_size / 2],
            scratch: vec![Complex::new(0.0, 0.0); fft_size],
        }
    }

    pub fn with_smoothing(mut self, smoothing: f32) -> Self {
        self.smoothing = smoothing.clamp(0.0, 1.0);
        self
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    pub fn reset(&mut self) {
        self.smoothed.iter_mut().for_each(|v| *v = 0.0);
    }

    /// Analyses the most recent `fft_size` samples of `time_domain`.
    /// Shorter input is treated as preceded by silence.
    pub fn analyse(&mut self, time_domain: &[f32]) -> FrequencyFrame {
        let take = time_domain.len().min(self.fft_size);
        let pad = self.fft_size - take;
        let recent = &time_domain[time_domain.len() - take..];

        for (i, slot) in self.scratch.iter_mut().enumerate() {
            let sample = if i < pad { 0.0 } else { recent[i - pad] };
            *slot = Complex::new(sample * self.window[i], 0.0);
        }
        self.fft.process(&mut self.scratch);

        let scale = 1.0 / self.fft_size as f32;
        let range = self.max_db - self.min_db;
        self.smoothed
            .iter_mut()
            .zip(&self.scratch)
            .map(|(prev, bin)| {
                let magnitude = bin.norm() * scale;
                *prev = self.smoothing * *prev + (1.0 - self.smoothing) * magnitude;
                if *prev <= 0.0 {
                    return 0;
                }
                let db = 20.0 * prev.log10();
                (255.0 / range * (db - self.min_db)).clamp(0.0, 255.0) as u8
            })
            .collect()
    }
}

impl Default for FrequencyAnalyser {
    fn default() -> Self {
        Self::new(Self::DEFAULT_FFT_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_is_all_zero() {
        let mut a = FrequencyAnalyser::default();
        let frame = a.analyse(&[0.0; 256]);
        assert_eq!(frame.len(), 128);
        assert!(frame.iter().all(|&b| b == 0));
        assert!(a.analyse(&[]).iter().all(|&b| b == 0));
    }

    #[test]
    fn tone_lights_up_its_bin() {
        let mut a = FrequencyAnalyser::default().with_smoothing(0.0);
        let tone: Vec<f32> = (0..256)
            .map(|i| (std::f32::consts::TAU * 16.0 * i as f32 / 256.0).sin())
            .collect();
        let frame = a.analyse(&tone);
        assert_eq!(frame[16], 255);
        assert!(frame[100] < 10, "far bin was {}", frame[100]);
    }

    #[test]
    fn smoothing_decays_after_sound_stops() {
        let mut a = FrequencyAnalyser::default();
        let tone: Vec<f32> = (0..256)
            .map(|i| 0.01 * (std::f32::consts::TAU * 8.0 * i as f32 / 256.0).sin())
            .collect();
        let loud = a.analyse(&tone)[8];
        let fading = a.analyse(&[])[8];
        assert!(fading < loud);
        assert!(fading > 0);
        a.reset();
        assert_eq!(a.analyse(&[])[8], 0);
    }

    #[test]
    fn size_is_normalized() {
        assert_eq!(FrequencyAnalyser::new(100).fft_size(), 128);
        assert_eq!(FrequencyAnalyser::new(1).bin_count(), 16);
    }
}
