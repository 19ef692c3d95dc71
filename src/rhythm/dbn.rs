//! Dynamic Bayesian network beat tracking.
//!
//! A bar-pointer style state space: each state is a (beat interval, position) pair,
//! the position advances one frame at a time and the interval may only change when a
//! beat completes. Viterbi decoding over a beat activation yields the beat frames.
//! A second, much smaller model tags tracked beats with their position in the bar.

use crate::error::TrackerError;

use super::downbeat::BEATS_PER_BAR;

/// Positions in the first 1/lambda of an interval are "beat" states.
const OBSERVATION_LAMBDA: usize = 16;
/// Penalises tempo changes between consecutive beats.
const TRANSITION_LAMBDA: f64 = 100.0;
const ACTIVATION_FLOOR: f64 = 1e-6;

struct BeatStateSpace {
    num_states: usize,
    state_positions: Vec<usize>,
    state_intervals: Vec<usize>,
    first_states: Vec<usize>,
    last_states: Vec<usize>,
}

impl BeatStateSpace {
    fn new(min_interval: usize, max_interval: usize) -> Self {
        let intervals: Vec<usize> = (min_interval..=max_interval).collect();
        let num_states: usize = intervals.iter().sum();
        let mut state_positions = Vec::with_capacity(num_states);
        let mut state_intervals = Vec::with_capacity(num_states);
        let mut first_states = Vec::with_capacity(intervals.len());
        let mut last_states = Vec::with_capacity(intervals.len());

        let mut idx = 0usize;
        for &interval in &intervals {
            first_states.push(idx);
            last_states.push(idx + interval - 1);
            for pos in 0..interval {
                state_positions.push(pos);
                state_intervals.push(interval);
            }
            idx += interval;
        }

        Self {
            num_states,
            state_positions,
            state_intervals,
            first_states,
            last_states,
        }
    }

    fn is_beat_state(&self, state: usize) -> bool {
        self.state_positions[state] * OBSERVATION_LAMBDA < self.state_intervals[state]
    }
}

/// Log transition probabilities from every last state (row) to every first state (column).
fn interval_transitions(space: &BeatStateSpace) -> Vec<Vec<f64>> {
    let intervals: Vec<usize> = space
        .first_states
        .iter()
        .map(|&s| space.state_intervals[s])
        .collect();

    intervals
        .iter()
        .map(|&from| {
            let weights: Vec<f64> = intervals
                .iter()
                .map(|&to| (-TRANSITION_LAMBDA * (to as f64 / from as f64 - 1.0).abs()).exp())
                .collect();
            let total: f64 = weights.iter().sum();
            weights.iter().map(|w| (w / total).ln()).collect()
        })
        .collect()
}

/// Viterbi beat tracker over a beat activation in [0, 1].
#[derive(Clone, Debug, Default)]
pub struct DbnBeatTracker;

impl DbnBeatTracker {
    /// Beat frames for tempi between `min_bpm` and `max_bpm`.
    pub fn track(
        &self,
        activation: &[f32],
        frame_rate: f32,
        min_bpm: f32,
        max_bpm: f32,
    ) -> Result<Vec<usize>, TrackerError> {
        let min_interval = (60.0 * frame_rate / max_bpm).round().max(1.0) as usize;
        let max_interval = (60.0 * frame_rate / min_bpm).round() as usize;
        if min_bpm <= 0.0 || max_bpm <= min_bpm || min_interval > max_interval {
            return Err(TrackerError::EmptyTempoRange { min_bpm, max_bpm });
        }
        let needed = 2 * max_interval;
        if activation.len() < needed {
            return Err(TrackerError::ActivationTooShort {
                frames: activation.len(),
                needed,
            });
        }

        let space = BeatStateSpace::new(min_interval, max_interval);
        let path = viterbi(&space, activation);

        let beats: Vec<usize> = path
            .iter()
            .enumerate()
            .filter(|&(t, &state)| {
                space.is_beat_state(state) && (t == 0 || !space.is_beat_state(path[t - 1]))
            })
            .map(|(t, _)| t)
            .collect();

        if beats.is_empty() {
            return Err(TrackerError::NoBeats);
        }
        log::debug!(
            "DBN decoded {} beats over {} states (intervals {}-{} frames)",
            beats.len(),
            space.num_states,
            min_interval,
            max_interval
        );
        Ok(beats)
    }
}

fn viterbi(space: &BeatStateSpace, activation: &[f32]) -> Vec<usize> {
    let n_states = space.num_states;
    let n_frames = activation.len();
    let transitions = interval_transitions(space);
    let lambda = OBSERVATION_LAMBDA as f64;

    let mut previous = vec![-(n_states as f64).ln(); n_states];
    let mut current = vec![f64::NEG_INFINITY; n_states];
    // Only interval-changing transitions need a pointer; all others come from `state - 1`
    let mut backpointers = vec![0u32; n_frames * space.first_states.len()];

    for (frame, &a) in activation.iter().enumerate() {
        let a = (a as f64).clamp(ACTIVATION_FLOOR, 1.0 - ACTIVATION_FLOOR);
        let log_beat = a.ln();
        let log_other = ((1.0 - a) / (lambda - 1.0)).ln();

        for (k, &first) in space.first_states.iter().enumerate() {
            let mut best = f64::NEG_INFINITY;
            let mut best_from = 0usize;
            for (j, &last) in space.last_states.iter().enumerate() {
                let score = previous[last] + transitions[j][k];
                if score > best {
                    best = score;
                    best_from = last;
                }
            }
            current[first] = best;
            backpointers[frame * space.first_states.len() + k] = best_from as u32;

            let interval = space.state_intervals[first];
            for pos in 1..interval {
                current[first + pos] = previous[first + pos - 1];
            }
        }

        for (state, value) in current.iter_mut().enumerate() {
            *value += if space.is_beat_state(state) { log_beat } else { log_other };
        }
        std::mem::swap(&mut previous, &mut current);
    }

    let mut state = previous
        .iter()
        .enumerate()
        .fold((0usize, f64::NEG_INFINITY), |acc, (i, &v)| if v > acc.1 { (i, v) } else { acc })
        .0;

    let mut path = vec![0usize; n_frames];
    for frame in (0..n_frames).rev() {
        path[frame] = state;
        if frame == 0 {
            break;
        }
        state = if space.state_positions[state] == 0 {
            let k = space
                .first_states
                .iter()
                .position(|&f| f == state)
                .unwrap_or(0);
            backpointers[frame * space.first_states.len() + k] as usize
        } else {
            state - 1
        };
    }
    path
}

/// Bar-position model over tracked beats: a cyclic HMM whose downbeat state emits the
/// downbeat activation and whose other states emit its complement.
#[derive(Clone, Debug)]
pub struct BarModel {
    /// Minimum per-beat log-likelihood margin of the winning phase over the runner-up
    pub min_confidence: f32,
}

/// Decoded bar alignment: which beat index is the first downbeat, and how sure we are.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BarAlignment {
    pub phase: usize,
    pub confidence: f32,
}

impl Default for BarModel {
    fn default() -> Self {
        Self { min_confidence: 0.1 }
    }
}

impl BarModel {
    /// Best phase for `activations` (one value per beat), or `None` when not confident.
    pub fn decode(&self, activations: &[f32]) -> Option<BarAlignment> {
        if activations.len() < BEATS_PER_BAR * 2 {
            return None;
        }

        let mut scores: Vec<(usize, f64)> = (0..BEATS_PER_BAR)
            .map(|phase| {
                let ll: f64 = activations
                    .iter()
                    .enumerate()
                    .map(|(k, &d)| {
                        let d = (d as f64).clamp(0.01, 0.99);
                        if (k + BEATS_PER_BAR - phase) % BEATS_PER_BAR == 0 {
                            d.ln()
                        } else {
                            (1.0 - d).ln()
                        }
                    })
                    .sum();
                (phase, ll)
            })
            .collect();
        scores.sort_by(|a, b| b.1.total_cmp(&a.1));

        let (phase, best) = scores[0];
        let margin = (best - scores[1].1) / activations.len() as f64;
        log::debug!("  Bar model: phase={}, margin={:.3}", phase, margin);
        if (margin as f32) < self.min_confidence {
            return None;
        }
        Some(BarAlignment {
            phase,
            confidence: margin as f32,
        })
    }
}

/// Bar positions (1-based) for each beat given the first downbeat's index.
pub fn tag_beats(beats: &[f32], phase: usize) -> Vec<(f32, usize)> {
    beats
        .iter()
        .enumerate()
        .map(|(k, &t)| (t, (k + BEATS_PER_BAR - phase % BEATS_PER_BAR) % BEATS_PER_BAR + 1))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pulse_activation(period: usize, offset: usize, frames: usize) -> Vec<f32> {
        (0..frames)
            .map(|t| if t >= offset && (t - offset) % period == 0 { 0.9 } else { 0.02 })
            .collect()
    }

    #[test]
    fn state_space_layout() {
        let space = BeatStateSpace::new(3, 5);
        assert_eq!(space.num_states, 12);
        assert_eq!(space.first_states, vec![0, 3, 7]);
        assert_eq!(space.last_states, vec![2, 6, 11]);
        assert!(space.is_beat_state(3));
        assert!(!space.is_beat_state(4));
    }

    #[test]
    fn transitions_are_normalised() {
        let space = BeatStateSpace::new(10, 14);
        for row in interval_transitions(&space) {
            let total: f64 = row.iter().map(|l| l.exp()).sum();
            assert!((total - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn decodes_regular_pulse() {
        let act = pulse_activation(20, 5, 600);
        let fr = 40.0; // 20 frames per beat = 120 BPM
        let beats = DbnBeatTracker.track(&act, fr, 90.0, 150.0).unwrap_or_default();
        assert!(beats.len() >= 25);
        let on_pulse = beats.iter().filter(|&&b| b >= 5 && (b - 5) % 20 == 0).count();
        assert!(on_pulse as f32 >= beats.len() as f32 * 0.9);
    }

    #[test]
    fn short_activation_is_rejected() {
        let err = DbnBeatTracker.track(&[0.5; 10], 40.0, 90.0, 150.0);
        assert!(matches!(err, Err(TrackerError::ActivationTooShort { .. })));
    }

    #[test]
    fn inverted_range_is_rejected() {
        let err = DbnBeatTracker.track(&[0.5; 1000], 40.0, 150.0, 90.0);
        assert!(matches!(err, Err(TrackerError::EmptyTempoRange { .. })));
    }

    #[test]
    fn bar_model_finds_accented_phase() {
        let acts: Vec<f32> = (0..32).map(|k| if k % 4 == 3 { 0.9 } else { 0.2 }).collect();
        let alignment = BarModel::default().decode(&acts);
        assert_eq!(alignment.map(|a| a.phase), Some(3));
    }

    #[test]
    fn bar_model_rejects_flat_accents() {
        let acts = vec![0.5f32; 32];
        assert!(BarModel::default().decode(&acts).is_none());
    }

    #[test]
    fn tagging_is_cyclic() {
        let tags = tag_beats(&[0.0, 0.5, 1.0, 1.5, 2.0], 1);
        let positions: Vec<usize> = tags.iter().map(|&(_, p)| p).collect();
        assert_eq!(positions, vec![4, 1, 2, 3, 4]);
    }
}
