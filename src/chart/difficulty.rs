use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// The five canonical difficulties, in output order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Difficulty {
    Beginner,
    Easy,
    Medium,
    Hard,
    Challenge,
}

/// Generation parameters for one difficulty. Presets are immutable.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DifficultyConfig {
    pub level: u8,
    /// Rows per measure
    pub subdivision: usize,
    /// Onsets may only land on quarter-note rows
    pub beats_only: bool,
    /// Use every n-th beat
    pub beat_skip: usize,
    pub onset_threshold: f32,
    pub jump_probability: f64,
    pub max_nps: f32,
    pub allow_jacks: bool,
    pub alternate_feet: bool,
}

impl Difficulty {
    pub const ALL: [Difficulty; 5] = [
        Difficulty::Beginner,
        Difficulty::Easy,
        Difficulty::Medium,
        Difficulty::Hard,
        Difficulty::Challenge,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Difficulty::Beginner => "Beginner",
            Difficulty::Easy => "Easy",
            Difficulty::Medium => "Medium",
            Difficulty::Hard => "Hard",
            Difficulty::Challenge => "Challenge",
        }
    }

    pub fn config(self) -> DifficultyConfig {
        match self {
            Difficulty::Beginner => DifficultyConfig {
                level: 1,
                subdivision: 4,
                beats_only: true,
                beat_skip: 2,
                onset_threshold: 0.95,
                jump_probability: 0.0,
                max_nps: 1.5,
                allow_jacks: false,
                alternate_feet: true,
            },
            Difficulty::Easy => DifficultyConfig {
                level: 3,
                subdivision: 4,
                beats_only: true,
                beat_skip: 1,
                onset_threshold: 0.75,
                jump_probability: 0.03,
                max_nps: 3.0,
                allow_jacks: false,
                alternate_feet: true,
            },
            Difficulty::Medium => DifficultyConfig {
                level: 6,
                subdivision: 8,
                beats_only: false,
                beat_skip: 1,
                onset_threshold: 0.40,
                jump_probability: 0.08,
                max_nps: 5.0,
                allow_jacks: false,
                alternate_feet: false,
            },
            Difficulty::Hard => DifficultyConfig {
                level: 8,
                subdivision: 16,
                beats_only: false,
                beat_skip: 1,
                onset_threshold: 0.25,
                jump_probability: 0.12,
                max_nps: 9.0,
                allow_jacks: true,
                alternate_feet: false,
            },
            Difficulty::Challenge => DifficultyConfig {
                level: 10,
                subdivision: 16,
                beats_only: false,
                beat_skip: 1,
                onset_threshold: 0.10,
                jump_probability: 0.18,
                max_nps: 14.0,
                allow_jacks: true,
                alternate_feet: false,
            },
        }
    }

    /// Per-difficulty salt mixed into the base seed so each chart gets its own stream.
    pub fn seed_salt(self) -> u64 {
        // splitmix64 finaliser over the index
        let mut z = (self as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Difficulty {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Difficulty::ALL
            .into_iter()
            .find(|d| d.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ValidationError::UnknownDifficulty(wanted.to_string()))
    }
}

/// Parse a difficulty selection into canonical order without duplicates.
pub fn parse_selection<S: AsRef<str>>(names: &[S]) -> Result<Vec<Difficulty>, ValidationError> {
    let mut selected = names
        .iter()
        .map(|n| n.as_ref().parse::<Difficulty>())
        .collect::<Result<Vec<_>, _>>()?;
    if selected.is_empty() {
        return Err(ValidationError::NoDifficulties);
    }
    selected.sort();
    selected.dedup();
    Ok(selected)
}
