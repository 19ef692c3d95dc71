use rayon::prelude::*;
use rustfft::{num_complex::Complex, FftPlanner};

pub const FFT_SIZE: usize = 2048;
pub const HOP_SIZE: usize = 512;

/// Magnitude spectrogram, frame-major: `frames[t][bin]`.
#[derive(Clone, Debug, Default)]
pub struct Spectrogram {
    pub frames: Vec<Vec<f32>>,
    pub num_bins: usize,
}

impl Spectrogram {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Number of centred frames produced for a signal of `len` samples.
pub fn frame_count(len: usize, hop: usize) -> usize {
    1 + len / hop
}

/// Centred short-time Fourier transform magnitudes (reflect padding, periodic Hann window).
pub fn stft_magnitude(samples: &[f32], fft_size: usize, hop: usize) -> Spectrogram {
    let num_bins = fft_size / 2 + 1;
    if samples.is_empty() {
        return Spectrogram {
            frames: Vec::new(),
            num_bins,
        };
    }

    let n_frames = frame_count(samples.len(), hop);
    let window = hann_window(fft_size);
    let pad = (fft_size / 2) as isize;

    let frames: Vec<Vec<f32>> = (0..n_frames)
        .into_par_iter()
        .map(|frame_idx| {
            let start = (frame_idx * hop) as isize - pad;
            let mut buffer: Vec<Complex<f32>> = (0..fft_size)
                .map(|i| Complex::new(reflect(samples, start + i as isize) * window[i], 0.0))
                .collect();

            // Per-thread FFT planner (rayon-safe)
            let mut planner = FftPlanner::<f32>::new();
            let fft = planner.plan_fft_forward(fft_size);
            fft.process(&mut buffer);

            buffer[..num_bins].iter().map(|c| c.norm()).collect()
        })
        .collect();

    Spectrogram { frames, num_bins }
}

/// Frame-wise RMS over centred windows of `frame_len` samples.
pub fn rms_envelope(samples: &[f32], frame_len: usize, hop: usize) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }
    let n_frames = frame_count(samples.len(), hop);
    let pad = (frame_len / 2) as isize;

    (0..n_frames)
        .into_par_iter()
        .map(|frame_idx| {
            let start = (frame_idx * hop) as isize - pad;
            let energy: f32 = (0..frame_len)
                .map(|i| {
                    let s = reflect(samples, start + i as isize);
                    s * s
                })
                .sum();
            (energy / frame_len as f32).sqrt()
        })
        .collect()
}

/// Reflect-padded sample lookup; zero outside what a single reflection can reach.
fn reflect(samples: &[f32], idx: isize) -> f32 {
    let len = samples.len() as isize;
    let j = if idx < 0 {
        -idx
    } else if idx >= len {
        2 * (len - 1) - idx
    } else {
        idx
    };
    if j >= 0 && j < len {
        samples[j as usize]
    } else {
        0.0
    }
}

pub fn hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / size as f32).cos()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_count_is_centred() {
        assert_eq!(frame_count(22050, 512), 44);
        let spec = stft_magnitude(&vec![0.0; 22050], FFT_SIZE, HOP_SIZE);
        assert_eq!(spec.len(), 44);
        assert_eq!(spec.num_bins, 1025);
    }

    #[test]
    fn sine_peaks_at_its_bin() {
        let sr = 22050.0;
        let freq = 1000.0;
        let samples: Vec<f32> = (0..22050)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sr).sin())
            .collect();
        let spec = stft_magnitude(&samples, FFT_SIZE, HOP_SIZE);
        let mid = &spec.frames[spec.len() / 2];
        let (peak_bin, _) = mid
            .iter()
            .enumerate()
            .fold((0, 0.0f32), |acc, (i, &m)| if m > acc.1 { (i, m) } else { acc });
        let expected = (freq * FFT_SIZE as f32 / sr).round() as usize;
        assert!((peak_bin as isize - expected as isize).abs() <= 1);
    }

    #[test]
    fn rms_of_constant_signal() {
        let rms = rms_envelope(&vec![0.5; 8192], 2048, 512);
        let mid = rms[rms.len() / 2];
        assert!((mid - 0.5).abs() < 1e-4);
    }

    #[test]
    fn empty_input_yields_no_frames() {
        assert!(stft_magnitude(&[], FFT_SIZE, HOP_SIZE).is_empty());
        assert!(rms_envelope(&[], 2048, 512).is_empty());
    }
}
