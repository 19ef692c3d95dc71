pub mod difficulty;
pub mod generate;
pub mod postprocess;
pub mod sm;

use serde::Serialize;

use difficulty::Difficulty;

pub const LANES: usize = 4;

pub const LEFT: usize = 0;
pub const DOWN: usize = 1;
pub const UP: usize = 2;
pub const RIGHT: usize = 3;

/// Lanes stepped on by each foot.
pub const LEFT_FOOT: [usize; 2] = [LEFT, DOWN];
pub const RIGHT_FOOT: [usize; 2] = [UP, RIGHT];

/// Lanes of the foot that does not normally cover `lane`.
pub fn opposite_foot(lane: usize) -> [usize; 2] {
    if LEFT_FOOT.contains(&lane) {
        RIGHT_FOOT
    } else {
        LEFT_FOOT
    }
}

/// Lane content of a row. Generated charts only place taps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Note {
    #[default]
    Empty,
    Tap,
}

impl Note {
    pub fn glyph(self) -> char {
        match self {
            Note::Empty => '0',
            Note::Tap => '1',
        }
    }

    pub fn is_active(self) -> bool {
        self != Note::Empty
    }
}

/// One grid slice across all four lanes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Row([Note; LANES]);

impl Row {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn tap(lane: usize) -> Self {
        let mut row = Self::empty();
        row.set(lane);
        row
    }

    pub fn set(&mut self, lane: usize) {
        self.0[lane] = Note::Tap;
    }

    pub fn clear(&mut self) {
        self.0 = [Note::Empty; LANES];
    }

    pub fn is_active(&self, lane: usize) -> bool {
        self.0[lane].is_active()
    }

    pub fn active_lanes(&self) -> Vec<usize> {
        (0..LANES).filter(|&lane| self.is_active(lane)).collect()
    }

    pub fn count(&self) -> usize {
        self.0.iter().filter(|n| n.is_active()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// The lane of a single-note row.
    pub fn single_lane(&self) -> Option<usize> {
        match self.active_lanes().as_slice() {
            [lane] => Some(*lane),
            _ => None,
        }
    }

    pub fn is_jump(&self) -> bool {
        self.count() >= 2
    }

    pub fn to_sm(&self) -> String {
        self.0.iter().map(|n| n.glyph()).collect()
    }
}

/// A bar: `subdivision` rows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Measure {
    pub rows: Vec<Row>,
}

impl Measure {
    pub fn empty(subdivision: usize) -> Self {
        Self {
            rows: vec![Row::empty(); subdivision],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(Row::is_empty)
    }
}

/// Active rows per rhythmic subdivision.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SubdivisionBreakdown {
    pub quarter: usize,
    pub eighth: usize,
    pub twelfth: usize,
    pub sixteenth: usize,
    /// 24ths and anything finer
    pub finer: usize,
}

impl SubdivisionBreakdown {
    /// Classify row `row` of a measure with `rows` rows by the denominator of `row / rows`.
    fn add(&mut self, row: usize, rows: usize) {
        let denom = rows / gcd(row, rows).max(1);
        let slot = if 4 % denom == 0 {
            &mut self.quarter
        } else if 8 % denom == 0 {
            &mut self.eighth
        } else if 12 % denom == 0 {
            &mut self.twelfth
        } else if 16 % denom == 0 {
            &mut self.sixteenth
        } else {
            &mut self.finer
        };
        *slot += 1;
    }
}

fn gcd(a: usize, b: usize) -> usize {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// A generated chart for one difficulty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chart {
    pub difficulty: Difficulty,
    pub level: u8,
    pub subdivision: usize,
    pub measures: Vec<Measure>,
}

impl Chart {
    pub fn rows(&self) -> impl Iterator<Item = &Row> {
        self.measures.iter().flat_map(|m| m.rows.iter())
    }

    /// Active rows (a jump counts once).
    pub fn note_count(&self) -> usize {
        self.rows().filter(|r| !r.is_empty()).count()
    }

    pub fn jump_count(&self) -> usize {
        self.rows().filter(|r| r.is_jump()).count()
    }

    pub fn subdivision_breakdown(&self) -> SubdivisionBreakdown {
        let mut breakdown = SubdivisionBreakdown::default();
        for measure in &self.measures {
            let rows = measure.rows.len();
            for (i, row) in measure.rows.iter().enumerate() {
                if !row.is_empty() {
                    breakdown.add(i, rows);
                }
            }
        }
        breakdown
    }
}
