//! Playability rules applied, in order, to freshly assigned measures.

use rand::rngs::StdRng;
use rand::Rng;

use crate::audio::features::SpectralFeatures;

use super::difficulty::DifficultyConfig;
use super::generate::Grid;
use super::{opposite_foot, Measure, Row, DOWN, LEFT, RIGHT, UP};

/// Rows quieter than this (normalised RMS) are muted.
const MUTE_RMS: f32 = 0.08;
const EMPHASIS_RMS: f32 = 0.70;
const EMPHASIS_PROBABILITY: f64 = 0.20;
const MIN_RUN: usize = 4;
const MIN_JUMP_GAP: usize = 3;

const CROSSOVER_MAX_LEVEL: u8 = 6;
const EMPHASIS_MIN_LEVEL: u8 = 5;
const RUN_SMOOTHING_MIN_LEVEL: u8 = 8;
const DENSE_JUMPS_MIN_LEVEL: u8 = 9;

/// Flowing four-step patterns runs are rewritten into.
pub const RUN_PATTERNS: [[usize; 4]; 4] = [
    [LEFT, DOWN, UP, RIGHT],
    [RIGHT, UP, DOWN, LEFT],
    [LEFT, UP, DOWN, RIGHT],
    [RIGHT, DOWN, UP, LEFT],
];

pub fn apply(
    measures: &mut [Measure],
    grid: &Grid,
    config: &DifficultyConfig,
    features: &SpectralFeatures,
    rng: &mut StdRng,
) {
    mute_quiet_rows(measures, grid, features);
    if config.level <= CROSSOVER_MAX_LEVEL {
        avoid_crossovers(measures);
    }
    if config.level >= EMPHASIS_MIN_LEVEL {
        emphasise_downbeats(measures, grid, features, rng);
    }
    if config.level >= RUN_SMOOTHING_MIN_LEVEL {
        smooth_runs(measures, rng);
    }
    space_jumps(measures, config.level, rng);
}

fn mute_quiet_rows(measures: &mut [Measure], grid: &Grid, features: &SpectralFeatures) {
    let mut muted = 0usize;
    for (m, measure) in measures.iter_mut().enumerate() {
        for (r, row) in measure.rows.iter_mut().enumerate() {
            if row.is_empty() {
                continue;
            }
            let time = grid.row_time(m * grid.subdivision + r);
            if features.rms_at(time) < MUTE_RMS {
                row.clear();
                muted += 1;
            }
        }
    }
    if muted > 0 {
        log::debug!("    muted {} rows in quiet passages", muted);
    }
}

/// Left straight to right (or back) becomes up (or down).
fn avoid_crossovers(measures: &mut [Measure]) {
    let mut previous: Option<usize> = None;
    for row in measures.iter_mut().flat_map(|m| m.rows.iter_mut()) {
        let Some(lane) = row.single_lane() else {
            continue;
        };
        match (previous, lane) {
            (Some(LEFT), RIGHT) => *row = Row::tap(UP),
            (Some(RIGHT), LEFT) => *row = Row::tap(DOWN),
            _ => {}
        }
        previous = row.single_lane();
    }
}

/// Loud lone notes on the first row of a measure sometimes gain an opposite-foot partner.
fn emphasise_downbeats(measures: &mut [Measure], grid: &Grid, features: &SpectralFeatures, rng: &mut StdRng) {
    for (m, measure) in measures.iter_mut().enumerate() {
        let Some(first) = measure.rows.first_mut() else {
            continue;
        };
        let Some(lane) = first.single_lane() else {
            continue;
        };
        let energy = features.rms_at(grid.row_time(m * grid.subdivision));
        if energy > EMPHASIS_RMS && rng.random::<f64>() < EMPHASIS_PROBABILITY {
            let partners = opposite_foot(lane);
            first.set(partners[rng.random_range(0..partners.len())]);
        }
    }
}

/// Runs of four or more consecutive single notes follow one of the fixed patterns.
fn smooth_runs(measures: &mut [Measure], rng: &mut StdRng) {
    let mut rows: Vec<&mut Row> = measures.iter_mut().flat_map(|m| m.rows.iter_mut()).collect();
    let mut start = 0usize;
    while start < rows.len() {
        if rows[start].single_lane().is_none() {
            start += 1;
            continue;
        }
        let len = rows[start..]
            .iter()
            .take_while(|r| r.single_lane().is_some())
            .count();
        if len >= MIN_RUN {
            let pattern = RUN_PATTERNS[rng.random_range(0..RUN_PATTERNS.len())];
            for (i, row) in rows[start..start + len].iter_mut().enumerate() {
                **row = Row::tap(pattern[i % pattern.len()]);
            }
        }
        start += len;
    }
}

/// Jumps closer than three rows to the previous kept jump collapse to one of their lanes.
fn space_jumps(measures: &mut [Measure], level: u8, rng: &mut StdRng) {
    let mut last_jump: Option<usize> = None;
    let mut index = 0usize;
    for row in measures.iter_mut().flat_map(|m| m.rows.iter_mut()) {
        if row.is_jump() {
            let crowded = last_jump.is_some_and(|last| index - last < MIN_JUMP_GAP);
            if crowded && level < DENSE_JUMPS_MIN_LEVEL {
                let lanes = row.active_lanes();
                *row = Row::tap(lanes[rng.random_range(0..lanes.len())]);
            } else {
                last_jump = Some(index);
            }
        }
        index += 1;
    }
}

/// Drop empty measures from the end, keeping at least one.
pub fn trim_trailing(measures: &mut Vec<Measure>) {
    while measures.len() > 1 && measures.last().is_some_and(Measure::is_empty) {
        measures.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::features::tests::synthetic;
    use crate::chart::difficulty::Difficulty;
    use rand::SeedableRng;

    fn grid(measures: usize, subdivision: usize) -> Grid {
        Grid {
            offset: 0.0,
            row_seconds: 2.0 / subdivision as f32,
            subdivision,
            measures,
        }
    }

    fn lanes(measures: &[Measure]) -> Vec<Option<usize>> {
        measures.iter().flat_map(|m| m.rows.iter()).map(Row::single_lane).collect()
    }

    fn with_taps(subdivision: usize, taps: &[(usize, usize)]) -> Vec<Measure> {
        let count = taps.iter().map(|&(i, _)| i / subdivision + 1).max().unwrap_or(1);
        let mut measures = vec![Measure::empty(subdivision); count];
        for &(i, lane) in taps {
            measures[i / subdivision].rows[i % subdivision].set(lane);
        }
        measures
    }

    #[test]
    fn quiet_rows_are_muted() {
        let features = synthetic(500, |_| 0.0, |t| if t < 200 { 0.01 } else { 1.0 });
        let g = grid(4, 4);
        // row 0 at 0s (quiet), row 12 at 6s (loud)
        let mut measures = with_taps(4, &[(0, LEFT), (12, UP)]);
        mute_quiet_rows(&mut measures, &g, &features);
        assert!(measures[0].rows[0].is_empty());
        assert_eq!(measures[3].rows[0].single_lane(), Some(UP));
    }

    #[test]
    fn crossovers_step_through_the_middle() {
        let mut measures = with_taps(4, &[(0, LEFT), (1, RIGHT), (2, RIGHT), (3, LEFT)]);
        avoid_crossovers(&mut measures);
        assert_eq!(lanes(&measures), vec![Some(LEFT), Some(UP), Some(RIGHT), Some(DOWN)]);
    }

    #[test]
    fn jumps_do_not_reset_crossover_memory() {
        let mut measures = with_taps(4, &[(0, RIGHT), (1, UP), (1, DOWN), (2, LEFT)]);
        avoid_crossovers(&mut measures);
        assert_eq!(measures[0].rows[2].single_lane(), Some(DOWN));
    }

    #[test]
    fn run_of_five_follows_one_pattern() {
        let features = synthetic(3000, |_| 0.0, |_| 1.0);
        let config = Difficulty::Hard.config();
        for seed in 0..8 {
            let mut measures = with_taps(16, &[(2, UP), (3, UP), (4, LEFT), (5, RIGHT), (6, UP), (20, LEFT)]);
            let mut rng = StdRng::seed_from_u64(seed);
            apply(&mut measures, &grid(2, 16), &config, &features, &mut rng);

            let run: Vec<usize> = lanes(&measures)[2..7].iter().flatten().copied().collect();
            assert_eq!(run.len(), 5);
            let pattern = RUN_PATTERNS
                .iter()
                .find(|p| p[..] == run[..4])
                .unwrap_or_else(|| panic!("{:?} is not a run pattern", run));
            assert_eq!(run[4], pattern[0]);
        }
    }

    #[test]
    fn short_runs_are_left_alone() {
        let mut measures = with_taps(16, &[(2, UP), (3, UP), (4, LEFT)]);
        let mut rng = StdRng::seed_from_u64(1);
        smooth_runs(&mut measures, &mut rng);
        assert_eq!(&lanes(&measures)[2..5], &[Some(UP), Some(UP), Some(LEFT)]);
    }

    #[test]
    fn crowded_jumps_collapse_below_level_nine() {
        let taps = [(0, LEFT), (0, RIGHT), (2, DOWN), (2, UP), (5, LEFT), (5, UP)];
        let mut measures = with_taps(16, &taps);
        let mut rng = StdRng::seed_from_u64(4);
        space_jumps(&mut measures, 8, &mut rng);
        let rows = &measures[0].rows;
        assert!(rows[0].is_jump());
        let kept = rows[2].single_lane();
        assert!(kept == Some(DOWN) || kept == Some(UP));
        assert!(rows[5].is_jump());

        let mut dense = with_taps(16, &taps);
        space_jumps(&mut dense, 10, &mut rng);
        assert!(dense[0].rows.iter().filter(|r| r.is_jump()).count() == 3);
    }

    #[test]
    fn emphasis_adds_opposite_foot_partner() {
        let features = synthetic(3000, |_| 0.0, |_| 1.0);
        let taps: Vec<(usize, usize)> = (0..30).map(|m| (m * 8, LEFT)).collect();
        let mut measures = with_taps(8, &taps);
        let mut rng = StdRng::seed_from_u64(12);
        emphasise_downbeats(&mut measures, &grid(30, 8), &features, &mut rng);
        let jumps: Vec<&Row> = measures.iter().map(|m| &m.rows[0]).filter(|r| r.is_jump()).collect();
        assert!(!jumps.is_empty() && jumps.len() < 30);
        for row in jumps {
            let active = row.active_lanes();
            assert_eq!(active.len(), 2);
            assert!(active.contains(&LEFT));
            assert!(active.contains(&UP) || active.contains(&RIGHT));
        }
    }

    #[test]
    fn trimming_keeps_one_measure() {
        let mut measures = vec![Measure::empty(4); 3];
        trim_trailing(&mut measures);
        assert_eq!(measures.len(), 1);

        let mut measures = with_taps(4, &[(5, DOWN)]);
        measures.push(Measure::empty(4));
        trim_trailing(&mut measures);
        assert_eq!(measures.len(), 2);
    }
}
