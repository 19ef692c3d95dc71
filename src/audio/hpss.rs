use rayon::prelude::*;

use super::stft::Spectrogram;

const KERNEL: usize = 31;
const MARGIN: f32 = 3.0;

/// Percussive component of a magnitude spectrogram via median-filter separation.
///
/// Harmonic energy is the median across time per bin, percussive energy the median
/// across frequency per frame; a soft mask keeps bins where percussion dominates
/// the harmonic estimate scaled by the margin.
pub fn percussive(spec: &Spectrogram) -> Spectrogram {
    if spec.is_empty() {
        return spec.clone();
    }
    let n_frames = spec.len();
    let n_bins = spec.num_bins;

    // Harmonic: median along time, computed bin-major then read back per frame
    let harmonic_by_bin: Vec<Vec<f32>> = (0..n_bins)
        .into_par_iter()
        .map(|bin| {
            let series: Vec<f32> = spec.frames.iter().map(|f| f[bin]).collect();
            median_filter(&series, KERNEL)
        })
        .collect();

    let frames = spec
        .frames
        .par_iter()
        .enumerate()
        .map(|(t, frame)| {
            let perc = median_filter(frame, KERNEL);
            frame
                .iter()
                .enumerate()
                .map(|(bin, &mag)| {
                    let p = perc[bin] * perc[bin];
                    let h = harmonic_by_bin[bin][t] * MARGIN;
                    let denom = p + h * h;
                    let mask = if denom > 1e-12 { p / denom } else { 0.0 };
                    mag * mask
                })
                .collect()
        })
        .collect::<Vec<Vec<f32>>>();

    debug_assert_eq!(frames.len(), n_frames);
    Spectrogram {
        frames,
        num_bins: n_bins,
    }
}

/// Centred running median; the window is truncated at the edges.
fn median_filter(values: &[f32], kernel: usize) -> Vec<f32> {
    let half = kernel / 2;
    let mut window: Vec<f32> = Vec::with_capacity(kernel);
    (0..values.len())
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(values.len());
            window.clear();
            window.extend_from_slice(&values[lo..hi]);
            let mid = window.len() / 2;
            let (_, median, _) = window.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
            *median
        })
        .collect()
}
