use crate::audio::features::SpectralFeatures;

pub const BEATS_PER_BAR: usize = 4;

/// Below this many beats the accent statistics are meaningless.
const MIN_BEATS_FOR_PHASE: usize = 8;
const PHASE_ZERO_BONUS: f32 = 1.05;

/// Accent-pattern downbeat: choose which of the first four beats starts the bar.
///
/// Each phase is scored by `strength_ratio * (1 + rms) * (1 + bass)` where the ratio
/// compares onset strength on candidate downbeats against all other beats. The winner
/// is walked back by whole bars to the earliest bar line inside the music.
pub fn accent_downbeat(features: &SpectralFeatures, beats: &[f32], bpm: f32, music_start: f32) -> f32 {
    if beats.len() < MIN_BEATS_FOR_PHASE {
        return beats.first().copied().unwrap_or(0.0);
    }

    let strengths: Vec<f32> = beats.iter().map(|&t| features.onset_strength_at(t)).collect();
    let bass_raw: Vec<f32> = beats.iter().map(|&t| features.bass_at(t)).collect();
    let bass_max = bass_raw.iter().copied().fold(0.0f32, f32::max);
    let bass_max = if bass_max > 0.0 { bass_max } else { 1.0 };
    let bass: Vec<f32> = bass_raw.iter().map(|b| b / bass_max).collect();

    let mut best_phase = 0;
    let mut best_score = -1.0f32;

    for phase in 0..BEATS_PER_BAR {
        let on: Vec<usize> = (phase..beats.len()).step_by(BEATS_PER_BAR).collect();
        if on.is_empty() {
            continue;
        }
        let off: Vec<usize> = (0..beats.len())
            .filter(|&i| (i + BEATS_PER_BAR - phase) % BEATS_PER_BAR != 0)
            .collect();

        let on_strength = mean(on.iter().map(|&i| strengths[i]));
        let off_strength = if off.is_empty() {
            1.0
        } else {
            mean(off.iter().map(|&i| strengths[i]))
        };
        let strength_ratio = on_strength / (off_strength + 1e-8);
        let rms_score = mean(on.iter().map(|&i| features.rms_at(beats[i])));
        let bass_score = mean(on.iter().map(|&i| bass[i]));

        let mut score = strength_ratio * (1.0 + rms_score) * (1.0 + bass_score);
        if phase == 0 {
            score *= PHASE_ZERO_BONUS;
        }

        log::debug!(
            "    Downbeat phase {}: score={:.3} (accent={:.2}, rms={:.2}, bass={:.2})",
            phase, score, strength_ratio, rms_score, bass_score
        );

        if score > best_score {
            best_score = score;
            best_phase = phase;
        }
    }

    log::info!("  Best downbeat: phase={}, score={:.3}", best_phase, best_score);
    back_project(beats[best_phase], bpm, music_start)
}

/// Walk a downbeat back by whole bars while the earlier bar line stays within a
/// quarter beat of the music start.
pub fn back_project(downbeat: f32, bpm: f32, music_start: f32) -> f32 {
    if bpm <= 0.0 {
        return downbeat;
    }
    let beat_period = 60.0 / bpm;
    let measure = BEATS_PER_BAR as f32 * beat_period;
    let floor = music_start - beat_period * 0.25;

    let mut downbeat = downbeat;
    while downbeat - measure >= floor {
        downbeat -= measure;
    }
    downbeat
}

fn mean(values: impl Iterator<Item = f32>) -> f32 {
    let (sum, count) = values.fold((0.0f32, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::features::tests::synthetic;

    /// 120 BPM beats with every fourth beat (starting at `accent_phase`) accented.
    fn accented(accent_phase: usize, beats: usize) -> (SpectralFeatures, Vec<f32>) {
        let f = synthetic(2000, |_| 0.1, |_| 0.5);
        let times: Vec<f32> = (0..beats).map(|i| 1.0 + i as f32 * 0.5).collect();
        let mut onset = f.onset_env.clone();
        let mut bass_frames = f.stft.clone();
        for (i, &t) in times.iter().enumerate() {
            let frame = f.time_to_frame(t, onset.len());
            let accent = i % BEATS_PER_BAR == accent_phase;
            onset[frame] = if accent { 3.0 } else { 1.0 };
            for bin in bass_frames.frames[frame].iter_mut() {
                *bin = if accent { 2.0 } else { 0.5 };
            }
        }
        let features = SpectralFeatures::new(
            f.sample_rate,
            f.hop_size,
            f.duration,
            f.mel_db.clone(),
            onset,
            f.rms.clone(),
            bass_frames,
        );
        (features, times)
    }

    #[test]
    fn few_beats_default_to_first() {
        let f = synthetic(100, |_| 0.0, |_| 1.0);
        assert_eq!(accent_downbeat(&f, &[0.7, 1.2, 1.7], 120.0, 0.0), 0.7);
        assert_eq!(accent_downbeat(&f, &[], 120.0, 0.0), 0.0);
    }

    #[test]
    fn accented_phase_wins_and_walks_back() {
        let (f, beats) = accented(2, 32);
        // music starts before the first beat so the bar line walks back one bar
        let db = accent_downbeat(&f, &beats, 120.0, 0.0);
        // phase 2 => beat at 2.0s; one bar (2.0s) earlier is 0.0s >= -0.125
        assert!((db - 0.0).abs() < 1e-4, "downbeat {}", db);
        assert!(db <= beats[0]);
        let measure = 2.0;
        let offset = (beats[2] - db).rem_euclid(measure);
        assert!(offset < 1e-3 || (measure - offset) < 1e-3);
    }

    #[test]
    fn accented_phase_without_walk_back() {
        let (f, beats) = accented(1, 32);
        let db = accent_downbeat(&f, &beats, 120.0, 1.0);
        assert!((db - 1.5).abs() < 1e-4, "downbeat {}", db);
        assert!(db <= beats[0] + 2.0);
    }

    #[test]
    fn back_projection_respects_quarter_beat_tolerance() {
        // measure = 2s at 120 BPM, tolerance = 0.125s
        assert!((back_project(5.0, 120.0, 0.9) - 1.0).abs() < 1e-5);
        assert!((back_project(5.0, 120.0, 1.2) - 3.0).abs() < 1e-5);
        assert!((back_project(5.0, 120.0, 1.1) - 1.0).abs() < 1e-5);
    }
}
