use std::str::FromStr;

use crate::audio::analysis::percussive_onset_env;
use crate::audio::features::SpectralFeatures;
use crate::error::{TrackerError, ValidationError};

use super::beat::track_beat_frames;
use super::dbn::{tag_beats, BarModel, DbnBeatTracker};
use super::downbeat::{accent_downbeat, back_project};
use super::tempo::{self, TempoEstimate, MAX_BPM, MIN_BPM};

/// Tracked beats must lie within this distance of the music start to count as tagged downbeats.
const DOWNBEAT_START_TOLERANCE: f32 = 0.1;
/// The model-based tracker searches this far either side of the estimated tempo.
const DBN_BPM_SPAN: f32 = 30.0;

/// Tempo, beat and downbeat estimation behind one interface.
///
/// Implementations are chosen once per session; every method sees the same features.
pub trait BeatTracker: Send + Sync {
    fn name(&self) -> &'static str;

    fn estimate_tempo(&self, features: &SpectralFeatures) -> Result<TempoEstimate, TrackerError>;

    /// Beat times in seconds (not yet trimmed to the music start).
    fn track_beats(&self, features: &SpectralFeatures, bpm: f32) -> Result<Vec<f32>, TrackerError>;

    /// Time of the earliest bar line at or before the first beat.
    fn find_downbeat(
        &self,
        features: &SpectralFeatures,
        beats: &[f32],
        bpm: f32,
        music_start: f32,
    ) -> Result<f32, TrackerError>;
}

/// Which backend a session should construct.
///
/// Parsed case-insensitively through `FromStr` from both the command line and the config file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(try_from = "String")]
pub enum Backend {
    /// The model-based tracker, with per-step classical fallback
    #[default]
    Auto,
    Dbn,
    Classical,
}

impl FromStr for Backend {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Backend::Auto),
            "dbn" => Ok(Backend::Dbn),
            "classical" => Ok(Backend::Classical),
            _ => Err(ValidationError::UnknownBackend(s.to_string())),
        }
    }
}

impl TryFrom<String> for Backend {
    type Error = ValidationError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl Backend {
    pub fn build(self) -> Box<dyn BeatTracker> {
        match self {
            Backend::Auto | Backend::Dbn => Box::new(DbnTracker::default()),
            Backend::Classical => Box::new(ClassicalTracker),
        }
    }
}

/// Onset-envelope tracker with the multi-method tempo vote and accent-pattern downbeats.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClassicalTracker;

impl BeatTracker for ClassicalTracker {
    fn name(&self) -> &'static str {
        "classical"
    }

    fn estimate_tempo(&self, features: &SpectralFeatures) -> Result<TempoEstimate, TrackerError> {
        let percussive = percussive_onset_env(features);
        Ok(tempo::estimate_tempo(features, &percussive))
    }

    fn track_beats(&self, features: &SpectralFeatures, bpm: f32) -> Result<Vec<f32>, TrackerError> {
        let frames = track_beat_frames(&features.onset_env, features.frame_rate(), bpm);
        Ok(frames.into_iter().map(|f| features.frame_to_time(f)).collect())
    }

    fn find_downbeat(
        &self,
        features: &SpectralFeatures,
        beats: &[f32],
        bpm: f32,
        music_start: f32,
    ) -> Result<f32, TrackerError> {
        Ok(accent_downbeat(features, beats, bpm, music_start))
    }
}

/// Dynamic Bayesian network tracker driven by the normalised onset envelope, with a
/// bar-position model for downbeats.
#[derive(Clone, Debug, Default)]
pub struct DbnTracker {
    beats: DbnBeatTracker,
    bars: BarModel,
}

impl DbnTracker {
    fn activation(features: &SpectralFeatures) -> Vec<f32> {
        let max = features.onset_env.iter().copied().fold(0.0f32, f32::max);
        if max <= 0.0 {
            return vec![0.0; features.onset_env.len()];
        }
        features.onset_env.iter().map(|&v| v / max).collect()
    }

    fn decode(&self, features: &SpectralFeatures, min_bpm: f32, max_bpm: f32) -> Result<Vec<f32>, TrackerError> {
        let activation = Self::activation(features);
        let frames = self
            .beats
            .track(&activation, features.frame_rate(), min_bpm, max_bpm)?;
        Ok(frames.into_iter().map(|f| features.frame_to_time(f)).collect())
    }
}

impl BeatTracker for DbnTracker {
    fn name(&self) -> &'static str {
        "dbn"
    }

    /// Tempo from the slope of beats decoded over the full plausible range, octave-checked
    /// against the autocorrelation candidates by beat-grid alignment.
    fn estimate_tempo(&self, features: &SpectralFeatures) -> Result<TempoEstimate, TrackerError> {
        let beats = self.decode(features, MIN_BPM, MAX_BPM)?;
        let period = beat_period(&beats).ok_or(TrackerError::NoBeats)?;
        let decoded = 60.0 / period;
        log::info!("  DBN tempo: {:.2} BPM over {} beats", decoded, beats.len());

        let (_, others) = tempo::raw_candidates(features, &percussive_onset_env(features));
        let mut raw = vec![decoded];
        raw.extend(others);
        Ok(tempo::select_tempo(decoded, &raw, &tempo::strong_onset_times(features)))
    }

    fn track_beats(&self, features: &SpectralFeatures, bpm: f32) -> Result<Vec<f32>, TrackerError> {
        let min_bpm = (bpm - DBN_BPM_SPAN).max(40.0);
        let max_bpm = (bpm + DBN_BPM_SPAN).min(240.0);
        self.decode(features, min_bpm, max_bpm)
    }

    fn find_downbeat(
        &self,
        features: &SpectralFeatures,
        beats: &[f32],
        bpm: f32,
        music_start: f32,
    ) -> Result<f32, TrackerError> {
        let activations = downbeat_activation(features, beats);
        let first = self.bars.decode(&activations).and_then(|alignment| {
            tag_beats(beats, alignment.phase)
                .into_iter()
                .find(|&(t, pos)| pos == 1 && t >= music_start - DOWNBEAT_START_TOLERANCE)
                .map(|(t, _)| (t, alignment.confidence))
        });

        match first {
            Some((t, confidence)) => {
                log::info!("  Bar model found first downbeat at {:.3}s (margin {:.2})", t, confidence);
                Ok(back_project(t, bpm, music_start))
            }
            None => {
                log::info!("  No confident downbeat from bar model, using accent analysis");
                Ok(accent_downbeat(features, beats, bpm, music_start))
            }
        }
    }
}

/// Per-beat downbeat evidence: mean of normalised onset strength and bass energy.
fn downbeat_activation(features: &SpectralFeatures, beats: &[f32]) -> Vec<f32> {
    let strength: Vec<f32> = beats.iter().map(|&t| features.onset_strength_at(t)).collect();
    let bass: Vec<f32> = beats.iter().map(|&t| features.bass_at(t)).collect();
    let s_max = strength.iter().copied().fold(0.0f32, f32::max);
    let b_max = bass.iter().copied().fold(0.0f32, f32::max);
    let norm = |v: f32, max: f32| if max > 0.0 { v / max } else { 0.0 };

    strength
        .iter()
        .zip(bass.iter())
        .map(|(&s, &b)| 0.5 * norm(s, s_max) + 0.5 * norm(b, b_max))
        .collect()
}

/// Least-squares slope of beat time against beat index.
fn beat_period(beats: &[f32]) -> Option<f32> {
    if beats.len() < 2 {
        return None;
    }
    let n = beats.len() as f32;
    let mean_k = (n - 1.0) / 2.0;
    let mean_t = beats.iter().sum::<f32>() / n;
    let (num, den) = beats.iter().enumerate().fold((0.0f32, 0.0f32), |(num, den), (k, &t)| {
        let dk = k as f32 - mean_k;
        (num + dk * (t - mean_t), den + dk * dk)
    });
    if den <= 0.0 || num <= 0.0 {
        return None;
    }
    Some(num / den)
}

/// Sort, drop duplicates, and keep beats inside `[music_start, duration]`.
pub fn finalize_beats(mut beats: Vec<f32>, music_start: f32, duration: f32) -> Vec<f32> {
    beats.retain(|t| t.is_finite());
    beats.sort_by(|a, b| a.total_cmp(b));
    beats.dedup_by(|a, b| (*a - *b).abs() < 1e-6);

    let before = beats.len();
    beats.retain(|&t| t <= duration);
    let total = beats.len();
    beats.retain(|&t| t >= music_start);
    let discarded = total - beats.len();
    if discarded > 0 {
        log::info!("  Discarded {} beats in leading silence", discarded);
    }
    if before > total {
        log::debug!("  Dropped {} beats past the end of the track", before - total);
    }
    beats
}
