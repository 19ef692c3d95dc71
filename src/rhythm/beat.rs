/// How strongly the tracker sticks to the target period.
const TIGHTNESS: f32 = 100.0;

/// Dynamic-programming beat tracker guided by the onset envelope.
///
/// Returns beat frame indices, strictly increasing. `bpm` seeds the expected period.
pub fn track_beat_frames(env: &[f32], frame_rate: f32, bpm: f32) -> Vec<usize> {
    if env.is_empty() || bpm <= 0.0 || env.iter().all(|&v| v <= 0.0) {
        return Vec::new();
    }

    let period = 60.0 * frame_rate / bpm;
    if period < 1.0 {
        return Vec::new();
    }

    let normalized = normalize_by_std(env);
    let local = local_score(&normalized, period);
    let (cumscore, backlink) = dynamic_program(&local, period);

    let Some(last) = last_beat(&cumscore) else {
        return Vec::new();
    };

    let mut beats = Vec::new();
    let mut cursor = Some(last);
    while let Some(i) = cursor {
        beats.push(i);
        cursor = backlink[i];
    }
    beats.reverse();

    trim_beats(&local, beats)
}

fn normalize_by_std(env: &[f32]) -> Vec<f32> {
    let n = env.len() as f32;
    let mean = env.iter().sum::<f32>() / n;
    let var = env.iter().map(|&v| (v - mean) * (v - mean)).sum::<f32>() / (n - 1.0).max(1.0);
    let std = var.sqrt();
    if std <= 1e-10 {
        return env.to_vec();
    }
    env.iter().map(|&v| v / std).collect()
}

/// Onset envelope smoothed by a Gaussian of width period/32.
fn local_score(env: &[f32], period: f32) -> Vec<f32> {
    let half = period.round() as isize;
    let kernel: Vec<f32> = (-half..=half)
        .map(|k| {
            let x = k as f32 * 32.0 / period;
            (-0.5 * x * x).exp()
        })
        .collect();

    let n = env.len() as isize;
    (0..n)
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .filter_map(|(k, &w)| {
                    let j = i + k as isize - half;
                    (j >= 0 && j < n).then(|| w * env[j as usize])
                })
                .sum()
        })
        .collect()
}

fn dynamic_program(local: &[f32], period: f32) -> (Vec<f32>, Vec<Option<usize>>) {
    let n = local.len();
    let min_gap = (period / 2.0).round().max(1.0) as usize;
    let max_gap = (2.0 * period).round() as usize;

    let mut cumscore = vec![0.0f32; n];
    let mut backlink: Vec<Option<usize>> = vec![None; n];

    // Beats are only allowed to start once the local score first becomes meaningful
    let max_local = local.iter().copied().fold(0.0f32, f32::max);
    let mut first_beat = true;

    for i in 0..n {
        let mut best: Option<(usize, f32)> = None;
        if i >= min_gap {
            let lo = i.saturating_sub(max_gap);
            for j in lo..=(i - min_gap) {
                let gap = (i - j) as f32;
                let penalty = -TIGHTNESS * (gap / period).ln().powi(2);
                let score = cumscore[j] + penalty;
                if best.map_or(true, |(_, s)| score > s) {
                    best = Some((j, score));
                }
            }
        }

        cumscore[i] = local[i];
        if let Some((j, score)) = best {
            if !(first_beat && local[i] < 0.01 * max_local) {
                cumscore[i] += score;
                backlink[i] = Some(j);
            }
        }
        if first_beat && local[i] >= 0.01 * max_local {
            first_beat = false;
        }
    }

    (cumscore, backlink)
}

/// Last local maximum of the cumulative score that reaches half the median peak.
fn last_beat(cumscore: &[f32]) -> Option<usize> {
    let n = cumscore.len();
    let peaks: Vec<usize> = (0..n)
        .filter(|&i| {
            let left = if i > 0 { cumscore[i - 1] } else { f32::NEG_INFINITY };
            let right = if i + 1 < n { cumscore[i + 1] } else { f32::NEG_INFINITY };
            cumscore[i] > left && cumscore[i] >= right
        })
        .collect();
    if peaks.is_empty() {
        return None;
    }

    let mut values: Vec<f32> = peaks.iter().map(|&i| cumscore[i]).collect();
    values.sort_by(|a, b| a.total_cmp(b));
    let median = values[values.len() / 2];

    peaks.into_iter().rev().find(|&i| cumscore[i] >= 0.5 * median)
}

/// Drop weak beats at either end: below half the RMS of the Hann-smoothed beat scores.
fn trim_beats(local: &[f32], beats: Vec<usize>) -> Vec<usize> {
    if beats.is_empty() {
        return beats;
    }
    let raw: Vec<f32> = beats.iter().map(|&b| local[b]).collect();
    let hann = [0.25f32, 0.75, 1.0, 0.75, 0.25];
    let smoothed: Vec<f32> = (0..raw.len())
        .map(|i| {
            hann.iter()
                .enumerate()
                .filter_map(|(k, &w)| {
                    let j = i as isize + k as isize - 2;
                    (j >= 0 && (j as usize) < raw.len()).then(|| w * raw[j as usize])
                })
                .sum()
        })
        .collect();

    let rms = (smoothed.iter().map(|v| v * v).sum::<f32>() / smoothed.len() as f32).sqrt();
    let threshold = 0.5 * rms;

    let Some(start) = smoothed.iter().position(|&v| v >= threshold) else {
        return Vec::new();
    };
    let end = smoothed
        .iter()
        .rposition(|&v| v >= threshold)
        .unwrap_or(smoothed.len() - 1);

    beats[start..=end].to_vec()
}
