use serde::Serialize;

/// A detected onset: time in seconds and strength normalised to [0, 1].
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct OnsetEvent {
    pub time: f32,
    pub strength: f32,
}

/// Spectral-flux onset strength over a dB mel spectrogram (`[t][band]`).
///
/// Mean over bands of the positive first difference; frame 0 is always 0. The
/// envelope is delayed by `shift` frames (and truncated) to undo the lead that
/// centred analysis windows introduce.
pub fn onset_strength(mel_db: &[Vec<f32>], shift: usize) -> Vec<f32> {
    let n = mel_db.len();
    let mut env = vec![0.0f32; n];
    for t in 1..n {
        if t + shift >= n {
            break;
        }
        let cur = &mel_db[t];
        let prev = &mel_db[t - 1];
        if cur.is_empty() {
            continue;
        }
        let flux: f32 = cur
            .iter()
            .zip(prev.iter())
            .map(|(c, p)| (c - p).max(0.0))
            .sum();
        env[t + shift] = flux / cur.len() as f32;
    }
    env
}

/// Peak-picking parameters, in frames.
#[derive(Clone, Copy, Debug)]
pub struct PeakPick {
    pub pre_max: usize,
    pub post_max: usize,
    pub pre_avg: usize,
    pub post_avg: usize,
    pub delta: f32,
    pub wait: usize,
}

impl PeakPick {
    /// Defaults expressed in seconds (30 ms max window, 100 ms mean window), converted to frames.
    pub fn for_frame_rate(frame_rate: f32) -> Self {
        let frames = |secs: f32| (secs * frame_rate) as usize;
        Self {
            pre_max: frames(0.03),
            post_max: frames(0.0) + 1,
            pre_avg: frames(0.10),
            post_avg: frames(0.10) + 1,
            delta: 0.07,
            wait: frames(0.03),
        }
    }
}

/// Onset frames: local maxima above a moving-average threshold (no backtracking).
pub fn detect_onset_frames(env: &[f32], params: PeakPick) -> Vec<usize> {
    if env.is_empty() {
        return Vec::new();
    }

    // Normalise to [0, 1] so `delta` is scale-free
    let min = env.iter().copied().fold(f32::INFINITY, f32::min);
    let max = env.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;
    if range <= 0.0 {
        return Vec::new();
    }
    let norm: Vec<f32> = env.iter().map(|&v| (v - min) / range).collect();

    let n = norm.len();
    let mut peaks = Vec::new();
    let mut last: Option<usize> = None;

    for i in 0..n {
        let max_lo = i.saturating_sub(params.pre_max);
        let max_hi = (i + params.post_max).min(n);
        let local_max = norm[max_lo..max_hi]
            .iter()
            .copied()
            .fold(f32::NEG_INFINITY, f32::max);
        if norm[i] < local_max {
            continue;
        }

        let avg_lo = i.saturating_sub(params.pre_avg);
        let avg_hi = (i + params.post_avg).min(n);
        let local_mean = norm[avg_lo..avg_hi].iter().sum::<f32>() / (avg_hi - avg_lo) as f32;
        if norm[i] < local_mean + params.delta {
            continue;
        }

        if let Some(prev) = last {
            if i <= prev + params.wait {
                continue;
            }
        }

        peaks.push(i);
        last = Some(i);
    }

    peaks
}

/// Turn onset frames into events whose strengths are divided by the strongest onset.
pub fn onset_events(env: &[f32], frames: &[usize], frame_to_time: impl Fn(usize) -> f32) -> Vec<OnsetEvent> {
    let raw: Vec<f32> = frames.iter().map(|&f| env[f]).collect();
    let max = raw.iter().copied().fold(0.0f32, f32::max);

    frames
        .iter()
        .zip(raw)
        .map(|(&frame, strength)| OnsetEvent {
            time: frame_to_time(frame),
            strength: if max > 0.0 { strength / max } else { 0.0 },
        })
        .collect()
}
