// STFT frame source - host-side spectrum producer for recorded fixtures
//
// Slides a Hann window over mono PCM with a fixed hop, runs a forward FFT
// per hop and yields `SpectrumFrame`s with `fft_size / 2` bins of dB
// magnitude (normalized so a full-scale sine reads ~0 dB) plus per-bin phase.
// The detection core never sees PCM; this is the producer it expects.

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::analysis::preprocess::MIN_DB;
use crate::analysis::types::SpectrumFrame;

pub struct SpectrumFrameSource<'a> {
    samples: &'a [f32],
    sample_rate: u32,
    fft_size: usize,
    hop_size: usize,
    position: usize,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    /// Converts |X| to full-scale-sine-relative amplitude
    scale: f32,
    buffer: Vec<Complex<f32>>,
}

impl<'a> SpectrumFrameSource<'a> {
    pub fn new(samples: &'a [f32], sample_rate: u32, fft_size: usize, hop_size: usize) -> Self {
        let fft_size = fft_size.max(2);
        let window: Vec<f32> = (0..fft_size)
            .map(|i| {
                0.5 * (1.0
                    - ((2.0 * std::f32::consts::PI * i as f32) / (fft_size as f32 - 1.0)).cos())
            })
            .collect();
        let window_sum: f32 = window.iter().sum();
        let fft = FftPlanner::new().plan_fft_forward(fft_size);

        Self {
            samples,
            sample_rate,
            fft_size,
            hop_size: hop_size.max(1),
            position: 0,
            fft,
            window,
            scale: if window_sum > 0.0 { 2.0 / window_sum } else { 1.0 },
            buffer: vec![Complex::new(0.0, 0.0); fft_size],
        }
    }

    pub fn hop_ms(&self) -> f64 {
        self.hop_size as f64 * 1_000.0 / self.sample_rate.max(1) as f64
    }

    /// Frames still to come
    pub fn remaining(&self) -> usize {
        if self.position + self.fft_size > self.samples.len() {
            0
        } else {
            (self.samples.len() - self.fft_size - self.position) / self.hop_size + 1
        }
    }
}

impl Iterator for SpectrumFrameSource<'_> {
    type Item = SpectrumFrame;

    fn next(&mut self) -> Option<SpectrumFrame> {
        let end = self.position + self.fft_size;
        if end > self.samples.len() {
            return None;
        }

        for (slot, (&sample, &w)) in self
            .buffer
            .iter_mut()
            .zip(self.samples[self.position..end].iter().zip(&self.window))
        {
            *slot = Complex::new(sample * w, 0.0);
        }
        self.fft.process(&mut self.buffer);

        let bins = self.fft_size / 2;
        let mut magnitudes = Vec::with_capacity(bins);
        let mut phases = Vec::with_capacity(bins);
        for c in &self.buffer[..bins] {
            let amplitude = c.norm() * self.scale;
            magnitudes.push(if amplitude > 0.0 {
                (20.0 * amplitude.log10()).max(MIN_DB)
            } else {
                MIN_DB
            });
            phases.push(c.arg());
        }

        let timestamp_ms = self.position as f64 * 1_000.0 / self.sample_rate.max(1) as f64;
        self.position += self.hop_size;

        Some(
            SpectrumFrame::new(magnitudes, self.sample_rate, self.fft_size, timestamp_ms)
                .with_phases(phases),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(frequency_hz: f32, amplitude: f32, sample_rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|n| {
                amplitude
                    * (2.0 * std::f32::consts::PI * frequency_hz * n as f32 / sample_rate as f32).sin()
            })
            .collect()
    }

    #[test]
    fn test_frame_count_and_timestamps() {
        let samples = vec![0.0; 4096];
        let mut source = SpectrumFrameSource::new(&samples, 48_000, 1024, 512);
        assert_eq!(source.remaining(), 7);

        let frames: Vec<SpectrumFrame> = source.by_ref().collect();
        assert_eq!(frames.len(), 7);
        assert_eq!(frames[0].magnitudes_db.len(), 512);
        assert!(frames.iter().all(|f| f.magnitudes_db.iter().all(|&db| db == MIN_DB)));
        assert!((frames[1].timestamp_ms - 512.0 * 1_000.0 / 48_000.0).abs() < 1e-9);
        assert_eq!(source.remaining(), 0);
    }

    #[test]
    fn test_full_scale_sine_reads_near_zero_db() {
        let sample_rate = 48_000;
        let fft_size = 4096;
        // exact bin center avoids scalloping loss
        let bin = 200;
        let frequency = bin as f32 * sample_rate as f32 / fft_size as f32;
        let samples = sine(frequency, 1.0, sample_rate, fft_size);

        let frame = SpectrumFrameSource::new(&samples, sample_rate, fft_size, fft_size)
            .next()
            .unwrap();
        let peak_bin = frame
            .magnitudes_db
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak_bin, bin);
        assert!(frame.magnitudes_db[bin].abs() < 0.5);
        assert_eq!(frame.phases.as_ref().map(Vec::len), Some(fft_size / 2));
    }
}
