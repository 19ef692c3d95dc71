use thiserror::Error;

/// Rejected before the pipeline starts.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("BPM override must be in (0, 300], got {0}")]
    BpmOutOfRange(f32),
    #[error("no difficulties selected")]
    NoDifficulties,
    #[error("unknown difficulty '{0}' (expected Beginner, Easy, Medium, Hard or Challenge)")]
    UnknownDifficulty(String),
    #[error("unknown beat tracker backend '{0}' (expected auto, dbn or classical)")]
    UnknownBackend(String),
}

/// A beat-tracking backend could not handle this input; callers fall back to the classical path.
#[derive(Debug, Error, PartialEq)]
pub enum TrackerError {
    #[error("activation too short: {frames} frames, need at least {needed}")]
    ActivationTooShort { frames: usize, needed: usize },
    #[error("empty tempo range {min_bpm:.1}-{max_bpm:.1} BPM")]
    EmptyTempoRange { min_bpm: f32, max_bpm: f32 },
    #[error("no beats decoded")]
    NoBeats,
}
