use serde::Serialize;

use crate::audio::features::SpectralFeatures;

pub const MIN_BPM: f32 = 60.0;
pub const MAX_BPM: f32 = 200.0;

/// Tempo band most popular music falls in; candidates inside get a small bonus.
const COMMON_BAND: (f32, f32) = (80.0, 130.0);
const COMMON_BAND_BONUS: f32 = 1.10;

const OCTAVE_MULTIPLIERS: [f32; 7] = [0.5, 1.0, 2.0, 2.0 / 3.0, 3.0 / 2.0, 4.0 / 3.0, 3.0 / 4.0];

/// Search range of the autocorrelation trackers.
const TRACKER_RANGE: (f32, f32) = (30.0, 300.0);
/// Raw tempogram peaks outside this open range are ignored.
const TEMPOGRAM_RANGE: (f32, f32) = (40.0, 240.0);
const TEMPOGRAM_WINDOW_SECS: f32 = 8.0;

/// Consensus tempo plus the raw per-method candidates it was chosen from.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TempoEstimate {
    /// Beats per minute, snapped to the nearest 0.5
    pub bpm: f32,
    /// Grid-alignment score of the winner (0 for manual overrides)
    pub score: f32,
    /// Raw candidates from every method, before octave expansion
    pub candidates: Vec<f32>,
}

impl TempoEstimate {
    /// An explicit override bypasses estimation entirely.
    pub fn manual(bpm: f32) -> Self {
        Self {
            bpm: snap_bpm(bpm),
            score: 0.0,
            candidates: Vec::new(),
        }
    }
}

pub fn snap_bpm(bpm: f32) -> f32 {
    (bpm * 2.0).round() / 2.0
}

/// Four independent estimates, octave-expanded, then voted on by beat-grid alignment.
pub fn estimate_tempo(features: &SpectralFeatures, percussive_env: &[f32]) -> TempoEstimate {
    let (primary, raw) = raw_candidates(features, percussive_env);
    select_tempo(primary, &raw, &strong_onset_times(features))
}

/// Raw per-method tempos and the one that wins ties (method 1, else the first that ran).
pub fn raw_candidates(features: &SpectralFeatures, percussive_env: &[f32]) -> (f32, Vec<f32>) {
    let env = &features.onset_env;
    let fr = features.frame_rate();

    log::debug!("  Method 1: autocorrelation tracker (prior 120 BPM)");
    let t1 = tempo_with_prior(env, fr, 120.0);
    log::debug!("  Method 2: autocorrelation tracker (prior 95 BPM)");
    let t2 = tempo_with_prior(env, fr, 95.0);
    log::debug!("  Method 3: windowed tempogram peaks");
    let t3 = tempogram_peaks(env, fr);
    log::debug!("  Method 4: percussive-component tracker");
    let t4 = tempo_with_prior(percussive_env, fr, 120.0);

    let primary = t1.or(t2).or(t4).or_else(|| t3.first().copied()).unwrap_or(120.0);

    let mut raw: Vec<f32> = [t1, t2, t4].into_iter().flatten().collect();
    raw.extend(t3.iter().copied());
    log::info!(
        "  Raw tempo candidates: [{}]",
        raw.iter().map(|t| format!("{:.1}", t)).collect::<Vec<_>>().join(", ")
    );
    (primary, raw)
}

/// Pick the octave variant whose beat grid best matches `onset_times`.
pub fn select_tempo(primary: f32, raw: &[f32], onset_times: &[f32]) -> TempoEstimate {
    let candidates = octave_candidates(primary, raw);

    let mut best_bpm = primary.clamp(MIN_BPM, MAX_BPM);
    let mut best_score = -1.0f32;
    for &bpm in &candidates {
        let mut score = grid_alignment(bpm, onset_times);
        if bpm >= COMMON_BAND.0 && bpm <= COMMON_BAND.1 {
            score *= COMMON_BAND_BONUS;
        }
        log::debug!("    candidate {:.2} BPM: score={:.4}", bpm, score);
        // Strict comparison keeps the earliest candidate (the primary estimate) on ties
        if score > best_score {
            best_score = score;
            best_bpm = bpm;
        }
    }

    let bpm = snap_bpm(best_bpm).clamp(MIN_BPM, MAX_BPM);
    log::info!("  Best BPM candidate: {:.1} (score {:.4})", bpm, best_score.max(0.0));
    TempoEstimate {
        bpm,
        score: best_score.max(0.0),
        candidates: raw.to_vec(),
    }
}

/// Octave variants of every raw tempo inside [60, 200], rounded to 0.01 and deduplicated.
/// The unmodified primary estimate, when in range, comes first.
pub fn octave_candidates(primary: f32, raw: &[f32]) -> Vec<f32> {
    let round2 = |v: f32| (v * 100.0).round() / 100.0;
    let in_range = |v: f32| (MIN_BPM..=MAX_BPM).contains(&v);

    let mut rest: Vec<f32> = raw
        .iter()
        .flat_map(|&t| OCTAVE_MULTIPLIERS.iter().map(move |m| round2(t * m)))
        .filter(|&v| in_range(v))
        .collect();
    rest.sort_by(|a, b| a.total_cmp(b));
    rest.dedup();

    let mut out = Vec::with_capacity(rest.len() + 1);
    let head = round2(primary);
    if in_range(head) {
        out.push(head);
        rest.retain(|&v| v != head);
    }
    out.extend(rest);
    if out.is_empty() {
        out.push(round2(primary.clamp(MIN_BPM, MAX_BPM)));
    }
    out
}

/// Mean closeness of each onset to the nearest beat-grid line: `max(0, 0.5 - distance)`
/// with distance in beat periods.
///
/// The grid is anchored at the circular mean phase of the onsets, so a lead-in that does
/// not last a whole number of beats does not penalise the right tempo.
pub fn grid_alignment(bpm: f32, onset_times: &[f32]) -> f32 {
    if bpm <= 0.0 || onset_times.is_empty() {
        return 0.0;
    }
    let period = 60.0 / bpm;
    let phases: Vec<f32> = onset_times
        .iter()
        .map(|&t| (t / period).rem_euclid(1.0))
        .collect();

    let tau = std::f32::consts::TAU;
    let (sin, cos) = phases
        .iter()
        .fold((0.0f32, 0.0f32), |(s, c), &p| (s + (tau * p).sin(), c + (tau * p).cos()));
    let anchor = if sin.hypot(cos) > 1e-3 * phases.len() as f32 {
        (sin.atan2(cos) / tau).rem_euclid(1.0)
    } else {
        0.0
    };

    let total: f32 = phases
        .iter()
        .map(|&p| {
            let phase = (p - anchor).rem_euclid(1.0);
            let dist = phase.min(1.0 - phase);
            (0.5 - dist).max(0.0)
        })
        .sum();
    total / phases.len() as f32
}

/// Frame times whose onset strength lies in the top quartile.
pub fn strong_onset_times(features: &SpectralFeatures) -> Vec<f32> {
    let env = &features.onset_env;
    if env.is_empty() {
        return Vec::new();
    }
    let threshold = percentile(env, 75.0);
    env.iter()
        .enumerate()
        .filter(|&(_, &v)| v > threshold)
        .map(|(i, _)| features.frame_to_time(i))
        .collect()
}

/// Linear-interpolated percentile of `values` (0-100).
pub fn percentile(values: &[f32], q: f32) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let pos = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f32;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f32;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Autocorrelation tempo with a log-normal prior (one octave wide) centred on `start_bpm`.
pub fn tempo_with_prior(env: &[f32], frame_rate: f32, start_bpm: f32) -> Option<f32> {
    let corr = autocorrelation(env, frame_rate, TRACKER_RANGE)?;
    weighted_peak(&corr, frame_rate, start_bpm)
}

/// Per-window tempo peaks over 8 s windows with 50% overlap.
pub fn tempogram_peaks(env: &[f32], frame_rate: f32) -> Vec<f32> {
    let window = (TEMPOGRAM_WINDOW_SECS * frame_rate) as usize;
    let hop = (window / 2).max(1);

    let mut starts: Vec<usize> = Vec::new();
    if env.len() <= window {
        starts.push(0);
    } else {
        let mut s = 0;
        while s + window <= env.len() {
            starts.push(s);
            s += hop;
        }
    }

    let mut peaks: Vec<f32> = starts
        .into_iter()
        .filter_map(|s| {
            let slice = &env[s..(s + window).min(env.len())];
            let corr = autocorrelation(slice, frame_rate, TEMPOGRAM_RANGE)?;
            weighted_peak(&corr, frame_rate, 120.0)
        })
        .filter(|&bpm| bpm > TEMPOGRAM_RANGE.0 && bpm < TEMPOGRAM_RANGE.1)
        .map(snap_bpm)
        .collect();
    peaks.sort_by(|a, b| a.total_cmp(b));
    peaks.dedup();
    peaks
}

/// Mean-removed, per-lag normalised autocorrelation as `(lag, value)` over a BPM range.
fn autocorrelation(env: &[f32], frame_rate: f32, bpm_range: (f32, f32)) -> Option<Vec<(usize, f32)>> {
    let n = env.len();
    if n < 8 || frame_rate <= 0.0 {
        return None;
    }
    let min_lag = ((60.0 * frame_rate / bpm_range.1).floor() as usize).max(1);
    let max_lag = ((60.0 * frame_rate / bpm_range.0).ceil() as usize).min(n - 1);
    if min_lag >= max_lag {
        return None;
    }

    let mean = env.iter().sum::<f32>() / n as f32;
    let centered: Vec<f32> = env.iter().map(|&x| x - mean).collect();
    let energy: f32 = centered.iter().map(|&x| x * x).sum::<f32>() / n as f32;
    if energy < 1e-10 {
        return None;
    }

    Some(
        (min_lag..=max_lag)
            .map(|lag| {
                let sum: f32 = centered[..n - lag]
                    .iter()
                    .zip(centered[lag..].iter())
                    .map(|(&a, &b)| a * b)
                    .sum();
                (lag, sum / (n - lag) as f32 / energy)
            })
            .collect(),
    )
}

fn weighted_peak(corr: &[(usize, f32)], frame_rate: f32, start_bpm: f32) -> Option<f32> {
    let log_start = start_bpm.log2();
    let mut best: Option<(usize, f32)> = None;
    for (i, &(lag, value)) in corr.iter().enumerate() {
        if value <= 0.0 {
            continue;
        }
        let bpm = 60.0 * frame_rate / lag as f32;
        let z = bpm.log2() - log_start;
        let weighted = value * (-0.5 * z * z).exp();
        if best.map_or(true, |(_, w)| weighted > w) {
            best = Some((i, weighted));
        }
    }
    let (idx, _) = best?;

    // Parabolic interpolation around the peak for sub-frame precision
    let lag = corr[idx].0 as f32;
    let refined = if idx > 0 && idx + 1 < corr.len() {
        let (prev, curr, next) = (corr[idx - 1].1, corr[idx].1, corr[idx + 1].1);
        let denom = prev - 2.0 * curr + next;
        if denom.abs() > 1e-10 {
            let offset = 0.5 * (prev - next) / denom;
            if offset.abs() <= 1.0 {
                lag + offset
            } else {
                lag
            }
        } else {
            lag
        }
    } else {
        lag
    };

    Some(60.0 * frame_rate / refined)
}
