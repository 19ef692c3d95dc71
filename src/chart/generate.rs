use std::collections::{BTreeSet, VecDeque};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::audio::features::SpectralFeatures;
use crate::rhythm::downbeat::BEATS_PER_BAR;
use crate::session::Analysis;

use super::difficulty::{Difficulty, DifficultyConfig};
use super::{opposite_foot, postprocess, Chart, Measure, Row, LANES};

/// A source time must sit within this fraction of a row of the grid line to snap onto it.
const GRID_TOLERANCE: f32 = 0.45;
const RANDOM_LANE_PROBABILITY: f64 = 0.30;
const JACK_RETRIES: usize = 12;
const HISTORY_LEN: usize = 8;

/// Row timing for one difficulty, anchored on the first downbeat.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Grid {
    pub offset: f32,
    pub row_seconds: f32,
    pub subdivision: usize,
    pub measures: usize,
}

impl Grid {
    pub fn new(analysis: &Analysis, subdivision: usize) -> Self {
        let measure_seconds = analysis.measure_seconds();
        let offset = analysis.downbeat;
        let span = ((analysis.duration() - offset) / measure_seconds).ceil().max(0.0);
        Self {
            offset,
            row_seconds: measure_seconds / subdivision as f32,
            subdivision,
            measures: span as usize + 1,
        }
    }

    pub fn total_rows(&self) -> usize {
        self.measures * self.subdivision
    }

    /// Absolute time of a global row index.
    pub fn row_time(&self, row: usize) -> f32 {
        self.offset + row as f32 * self.row_seconds
    }

    /// Global row index `time` snaps to, if it lies close enough to a grid line.
    pub fn snap(&self, time: f32) -> Option<usize> {
        let position = (time - self.offset) / self.row_seconds;
        let row = position.round();
        if row < 0.0 || (position - row).abs() >= GRID_TOLERANCE {
            return None;
        }
        let row = row as usize;
        (row < self.total_rows()).then_some(row)
    }

    fn is_quarter_row(&self, row: usize) -> bool {
        row % (self.subdivision / BEATS_PER_BAR).max(1) == 0
    }
}

/// Grid rows marked for a note by the (skipped) beats and sufficiently strong onsets.
pub fn eligible_rows(analysis: &Analysis, config: &DifficultyConfig, grid: &Grid) -> BTreeSet<usize> {
    let in_range = |t: f32| t >= analysis.music_start && t <= analysis.duration();

    let mut rows: BTreeSet<usize> = analysis
        .beats
        .iter()
        .step_by(config.beat_skip.max(1))
        .copied()
        .filter(|&t| in_range(t))
        .filter_map(|t| grid.snap(t))
        .collect();

    let onset_rows = analysis
        .onsets
        .iter()
        .filter(|o| o.strength >= config.onset_threshold && in_range(o.time))
        .filter_map(|o| grid.snap(o.time))
        .filter(|&row| !config.beats_only || grid.is_quarter_row(row));
    rows.extend(onset_rows);
    rows
}

/// Evenly thin `rows` down to at most `max_notes` entries.
pub fn cap_density(rows: &BTreeSet<usize>, max_notes: usize) -> Vec<usize> {
    let sorted: Vec<usize> = rows.iter().copied().collect();
    if sorted.len() <= max_notes {
        return sorted;
    }
    let step = sorted.len() as f64 / max_notes as f64;
    (0..max_notes)
        .map(|i| sorted[(i as f64 * step) as usize])
        .collect()
}

/// Lane assignment for successive rows with a short memory of earlier lanes.
pub struct ArrowPicker<'a> {
    features: &'a SpectralFeatures,
    config: &'a DifficultyConfig,
    history: VecDeque<usize>,
}

impl<'a> ArrowPicker<'a> {
    pub fn new(features: &'a SpectralFeatures, config: &'a DifficultyConfig) -> Self {
        Self {
            features,
            config,
            history: VecDeque::with_capacity(HISTORY_LEN),
        }
    }

    /// Row for a note at `time`. The primary lane is remembered for the next call.
    pub fn pick(&mut self, time: f32, rng: &mut StdRng) -> Row {
        let mut lane = self.features.dominant_band(time);

        if rng.random::<f64>() < RANDOM_LANE_PROBABILITY {
            lane = rng.random_range(0..LANES);
        }

        let previous = self.history.back().copied();
        if let Some(last) = previous {
            if self.config.alternate_feet {
                let feet = opposite_foot(last);
                lane = feet[rng.random_range(0..feet.len())];
            }
            if !self.config.allow_jacks {
                for _ in 0..JACK_RETRIES {
                    if lane != last {
                        break;
                    }
                    lane = rng.random_range(0..LANES);
                }
            }
        }

        let mut row = Row::tap(lane);
        if self.config.jump_probability > 0.0 && rng.random::<f64>() < self.config.jump_probability {
            let others: Vec<usize> = (0..LANES).filter(|&l| l != lane).collect();
            row.set(others[rng.random_range(0..others.len())]);
        }

        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(lane);
        row
    }
}

/// Build one difficulty's chart. Identical inputs and seed give an identical chart.
pub fn generate_chart(analysis: &Analysis, difficulty: Difficulty, seed: u64) -> Chart {
    let config = difficulty.config();
    let grid = Grid::new(analysis, config.subdivision);
    let mut rng = StdRng::seed_from_u64(seed);

    let eligible = eligible_rows(analysis, &config, &grid);
    let max_notes = (analysis.duration() * config.max_nps).max(0.0) as usize;
    let rows = cap_density(&eligible, max_notes);
    if rows.len() < eligible.len() {
        log::debug!(
            "  {}: capped {} eligible rows to {}",
            difficulty,
            eligible.len(),
            rows.len()
        );
    }

    let mut measures = vec![Measure::empty(config.subdivision); grid.measures];
    let mut picker = ArrowPicker::new(&analysis.features, &config);
    for row in rows {
        let time = grid.row_time(row);
        if time < 0.0 || time > analysis.duration() {
            continue;
        }
        measures[row / config.subdivision].rows[row % config.subdivision] = picker.pick(time, &mut rng);
    }

    postprocess::apply(&mut measures, &grid, &config, &analysis.features, &mut rng);
    postprocess::trim_trailing(&mut measures);

    let chart = Chart {
        difficulty,
        level: config.level,
        subdivision: config.subdivision,
        measures,
    };
    debug_assert!(chart.note_count() <= max_notes);
    log::info!(
        "  {}: {} notes, {} jumps, {} measures",
        difficulty,
        chart.note_count(),
        chart.jump_count(),
        chart.measures.len()
    );
    chart
}

/// Generate every requested difficulty in parallel, each with its own seeded stream.
pub fn generate_charts(analysis: &Analysis, difficulties: &[Difficulty], base_seed: u64) -> Vec<Chart> {
    difficulties
        .par_iter()
        .map(|&d| generate_chart(analysis, d, base_seed ^ d.seed_salt()))
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::audio::features::tests::synthetic;
    use crate::audio::onset::OnsetEvent;
    use crate::rhythm::tempo::TempoEstimate;

    /// 120 BPM analysis over `seconds`: beats every 0.5 s from 0.5 s, onsets on every
    /// sixteenth with the given strength, constant full loudness.
    pub(crate) fn steady_analysis(seconds: f32, onset_strength: f32) -> Analysis {
        let frames = (seconds * 22050.0 / 512.0).ceil() as usize;
        let features = synthetic(frames, |_| 1.0, |_| 1.0);
        let duration = features.duration;
        let beats: Vec<f32> = (1..)
            .map(|i| i as f32 * 0.5)
            .take_while(|&t| t <= duration)
            .collect();
        let onsets: Vec<OnsetEvent> = (4..)
            .map(|i| i as f32 * 0.125)
            .take_while(|&t| t <= duration)
            .map(|time| OnsetEvent {
                time,
                strength: onset_strength,
            })
            .collect();
        Analysis {
            features,
            music_start: 0.45,
            tempo: TempoEstimate::manual(120.0),
            beats,
            downbeat: 0.5,
            onsets,
            beat_backend: "classical",
        }
    }

    #[test]
    fn grid_snaps_within_tolerance() {
        let a = steady_analysis(10.0, 1.0);
        let grid = Grid::new(&a, 16);
        assert!((grid.row_seconds - 0.125).abs() < 1e-6);
        assert_eq!(grid.snap(0.5), Some(0));
        assert_eq!(grid.snap(0.5 + 0.125 * 3.2), Some(3));
        assert_eq!(grid.snap(0.5 + 0.125 * 3.5), None);
        assert_eq!(grid.snap(0.3), None);
        // ceil((10.01 - 0.5) / 2) + 1
        assert_eq!(grid.measures, 6);
    }

    #[test]
    fn density_never_exceeds_cap() {
        for seconds in [3.0, 20.0, 60.0] {
            let a = steady_analysis(seconds, 1.0);
            for chart in generate_charts(&a, &Difficulty::ALL, 7) {
                let cap = chart.difficulty.config().max_nps;
                let nps = chart.note_count() as f32 / a.duration();
                assert!(nps <= cap, "{} at {}s: {} nps", chart.difficulty, seconds, nps);
            }
        }
    }

    #[test]
    fn capping_spreads_evenly() {
        let rows: BTreeSet<usize> = (0..100).collect();
        let capped = cap_density(&rows, 10);
        assert_eq!(capped, vec![0, 10, 20, 30, 40, 50, 60, 70, 80, 90]);
        assert!(cap_density(&rows, 0).is_empty());
        assert_eq!(cap_density(&rows, 200).len(), 100);
    }

    #[test]
    fn beginner_never_jumps() {
        let a = steady_analysis(60.0, 1.0);
        for seed in 0..5 {
            let chart = generate_chart(&a, Difficulty::Beginner, seed);
            assert_eq!(chart.level, 1);
            assert_eq!(chart.jump_count(), 0);
            assert!(chart.note_count() > 0);
        }
    }

    #[test]
    fn same_seed_same_chart() {
        let a = steady_analysis(30.0, 0.8);
        for d in Difficulty::ALL {
            assert_eq!(generate_chart(&a, d, 42), generate_chart(&a, d, 42));
        }
        let first = generate_charts(&a, &Difficulty::ALL, 9);
        let second = generate_charts(&a, &Difficulty::ALL, 9);
        assert_eq!(first, second);
        assert_ne!(
            generate_chart(&a, Difficulty::Challenge, 1),
            generate_chart(&a, Difficulty::Challenge, 2)
        );
    }

    #[test]
    fn weak_onsets_add_no_rows() {
        let mut a = steady_analysis(20.0, 0.05);
        a.beats.clear();
        for d in Difficulty::ALL {
            let config = d.config();
            let grid = Grid::new(&a, config.subdivision);
            assert!(eligible_rows(&a, &config, &grid).is_empty(), "{}", d);
        }
        // Beats still contribute
        let b = steady_analysis(20.0, 0.05);
        let config = Difficulty::Hard.config();
        let grid = Grid::new(&b, config.subdivision);
        let rows = eligible_rows(&b, &config, &grid);
        assert!(!rows.is_empty());
        assert!(rows.iter().all(|r| r % 4 == 0));
    }

    #[test]
    fn beats_only_keeps_onsets_on_quarter_rows() {
        let mut a = steady_analysis(20.0, 1.0);
        a.beats.clear();
        let config = DifficultyConfig {
            subdivision: 16,
            beats_only: true,
            ..Difficulty::Easy.config()
        };
        let grid = Grid::new(&a, config.subdivision);
        let rows = eligible_rows(&a, &config, &grid);
        assert!(!rows.is_empty());
        assert!(rows.iter().all(|r| r % 4 == 0));
    }

    #[test]
    fn rows_before_music_start_are_skipped() {
        let mut a = steady_analysis(20.0, 1.0);
        a.music_start = 4.0;
        let config = Difficulty::Challenge.config();
        let grid = Grid::new(&a, config.subdivision);
        let rows = eligible_rows(&a, &config, &grid);
        assert!(rows.iter().all(|&r| grid.row_time(r) >= 4.0 - grid.row_seconds));
    }

    #[test]
    fn no_sources_leaves_one_empty_measure() {
        let mut a = steady_analysis(10.0, 1.0);
        a.beats.clear();
        a.onsets.clear();
        let chart = generate_chart(&a, Difficulty::Medium, 3);
        assert_eq!(chart.measures.len(), 1);
        assert_eq!(chart.note_count(), 0);
        assert_eq!(chart.measures[0].rows.len(), 8);
    }

    #[test]
    fn trailing_measures_are_trimmed() {
        let a = steady_analysis(30.0, 1.0);
        for chart in generate_charts(&a, &Difficulty::ALL, 11) {
            assert!(chart.measures.iter().all(|m| m.rows.len() == chart.subdivision));
            let last = chart.measures.last().map(|m| m.is_empty());
            assert_eq!(last, Some(false), "{}", chart.difficulty);
            assert!(chart.rows().all(|r| r.to_sm().len() == LANES));
        }
    }

    #[test]
    fn alternating_picker_switches_feet() {
        let a = steady_analysis(5.0, 1.0);
        let config = Difficulty::Beginner.config();
        let mut picker = ArrowPicker::new(&a.features, &config);
        let mut rng = StdRng::seed_from_u64(5);
        let lanes: Vec<usize> = (0..200)
            .filter_map(|i| picker.pick(i as f32 * 0.02, &mut rng).single_lane())
            .collect();
        assert_eq!(lanes.len(), 200);
        for w in lanes.windows(2) {
            assert!(opposite_foot(w[0]).contains(&w[1]), "{:?}", w);
        }
    }

    #[test]
    fn jack_free_picker_never_repeats() {
        let a = steady_analysis(5.0, 1.0);
        let config = DifficultyConfig {
            jump_probability: 0.0,
            ..Difficulty::Medium.config()
        };
        let mut picker = ArrowPicker::new(&a.features, &config);
        let mut rng = StdRng::seed_from_u64(8);
        let lanes: Vec<usize> = (0..300)
            .filter_map(|i| picker.pick(i as f32 * 0.01, &mut rng).single_lane())
            .collect();
        assert!(lanes.windows(2).all(|w| w[0] != w[1]));
    }
}
