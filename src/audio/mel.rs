use super::stft::Spectrogram;

pub const N_MELS: usize = 128;
pub const MEL_FMAX: f32 = 8000.0;

const TOP_DB: f32 = 80.0;
const AMIN: f32 = 1e-10;

fn hz_to_mel(hz: f32) -> f32 {
    // Slaney scale: linear below 1 kHz, logarithmic above
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = (6.4f32).ln() / 27.0;
    if hz >= min_log_hz {
        min_log_mel + (hz / min_log_hz).ln() / logstep
    } else {
        hz / f_sp
    }
}

fn mel_to_hz(mel: f32) -> f32 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = (6.4f32).ln() / 27.0;
    if mel >= min_log_mel {
        min_log_hz * (logstep * (mel - min_log_mel)).exp()
    } else {
        mel * f_sp
    }
}

/// Triangular, area-normalised mel filters: `filters[band][bin]`.
pub fn mel_filterbank(sample_rate: u32, fft_size: usize, n_mels: usize, fmax: f32) -> Vec<Vec<f32>> {
    let num_bins = fft_size / 2 + 1;
    let fmax = fmax.min(sample_rate as f32 / 2.0);
    let fft_freqs: Vec<f32> = (0..num_bins)
        .map(|i| i as f32 * sample_rate as f32 / fft_size as f32)
        .collect();

    let mel_max = hz_to_mel(fmax);
    let mel_points: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f32 / (n_mels + 1) as f32))
        .collect();

    (0..n_mels)
        .map(|m| {
            let (lower, center, upper) = (mel_points[m], mel_points[m + 1], mel_points[m + 2]);
            let norm = 2.0 / (upper - lower);
            fft_freqs
                .iter()
                .map(|&f| {
                    let rising = (f - lower) / (center - lower);
                    let falling = (upper - f) / (upper - center);
                    rising.min(falling).max(0.0) * norm
                })
                .collect()
        })
        .collect()
}

/// Power mel spectrogram in dB relative to its peak, frame-major `[t][band]`.
pub fn mel_db(spec: &Spectrogram, filters: &[Vec<f32>]) -> Vec<Vec<f32>> {
    let power: Vec<Vec<f32>> = spec
        .frames
        .iter()
        .map(|frame| {
            filters
                .iter()
                .map(|filter| {
                    filter
                        .iter()
                        .zip(frame.iter())
                        .map(|(w, m)| w * m * m)
                        .sum::<f32>()
                })
                .collect()
        })
        .collect();

    power_to_db(&power)
}

fn power_to_db(power: &[Vec<f32>]) -> Vec<Vec<f32>> {
    let peak = power
        .iter()
        .flat_map(|f| f.iter().copied())
        .fold(AMIN, f32::max);
    let ref_db = 10.0 * peak.log10();
    let floor = -TOP_DB;

    power
        .iter()
        .map(|frame| {
            frame
                .iter()
                .map(|&p| (10.0 * p.max(AMIN).log10() - ref_db).max(floor))
                .collect()
        })
        .collect()
}
