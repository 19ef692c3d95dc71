use crate::audio::analysis::{detect_onsets, extract_features};
use crate::audio::decode::Waveform;
use crate::audio::features::SpectralFeatures;
use crate::audio::onset::OnsetEvent;
use crate::error::{TrackerError, ValidationError};
use crate::progress::Progress;
use crate::rhythm::downbeat::BEATS_PER_BAR;
use crate::rhythm::music_start::detect_music_start;
use crate::rhythm::tempo::TempoEstimate;
use crate::rhythm::tracker::{finalize_beats, Backend, BeatTracker, ClassicalTracker};

const MAX_MANUAL_BPM: f32 = 300.0;

/// Everything the chart generator needs, computed once per input file.
#[derive(Clone, Debug)]
pub struct Analysis {
    pub features: SpectralFeatures,
    pub music_start: f32,
    pub tempo: TempoEstimate,
    /// Strictly increasing, inside `[music_start, duration]`
    pub beats: Vec<f32>,
    pub downbeat: f32,
    pub onsets: Vec<OnsetEvent>,
    /// Tracker that produced the beats (the fallback's name when the preferred one failed)
    pub beat_backend: &'static str,
}

impl Analysis {
    pub fn duration(&self) -> f32 {
        self.features.duration
    }

    pub fn bpm(&self) -> f32 {
        self.tempo.bpm
    }

    pub fn measure_seconds(&self) -> f32 {
        BEATS_PER_BAR as f32 * 60.0 / self.tempo.bpm
    }
}

/// Reject manual BPM overrides outside (0, 300].
pub fn validate_bpm(bpm: f32) -> Result<f32, ValidationError> {
    if bpm.is_finite() && bpm > 0.0 && bpm <= MAX_MANUAL_BPM {
        Ok(bpm)
    } else {
        Err(ValidationError::BpmOutOfRange(bpm))
    }
}

/// One analysis run: the beat tracker is fixed at construction.
pub struct AnalysisSession {
    tracker: Box<dyn BeatTracker>,
    fallback: ClassicalTracker,
    manual_bpm: Option<f32>,
}

impl AnalysisSession {
    pub fn new(backend: Backend, manual_bpm: Option<f32>) -> Result<Self, ValidationError> {
        Self::with_tracker(backend.build(), manual_bpm)
    }

    pub fn with_tracker(tracker: Box<dyn BeatTracker>, manual_bpm: Option<f32>) -> Result<Self, ValidationError> {
        let manual_bpm = manual_bpm.map(validate_bpm).transpose()?;
        Ok(Self {
            tracker,
            fallback: ClassicalTracker,
            manual_bpm,
        })
    }

    pub fn tracker_name(&self) -> &'static str {
        self.tracker.name()
    }

    /// Run the preferred tracker, falling back to the classical one for this step on failure.
    fn with_fallback<T>(
        &self,
        step: &str,
        run: impl Fn(&dyn BeatTracker) -> Result<T, TrackerError>,
    ) -> Result<(T, &'static str), TrackerError> {
        match run(self.tracker.as_ref()) {
            Ok(value) => Ok((value, self.tracker.name())),
            Err(err) => {
                log::warn!(
                    "{} failed in {} tracker ({}), falling back to {}",
                    step,
                    self.tracker.name(),
                    err,
                    self.fallback.name()
                );
                Ok((run(&self.fallback)?, self.fallback.name()))
            }
        }
    }

    pub fn run(&self, waveform: &Waveform, progress: &dyn Progress) -> Result<Analysis, TrackerError> {
        log::info!(
            "Analyzing {:.1}s of audio with the {} tracker",
            waveform.duration(),
            self.tracker.name()
        );

        progress.report("Extracting features", 10);
        let features = extract_features(waveform);

        progress.report("Detecting music start", 40);
        let music_start = detect_music_start(&features);

        progress.report("Estimating tempo", 45);
        let tempo = match self.manual_bpm {
            Some(bpm) => {
                log::info!("Using manual BPM override: {:.2}", bpm);
                TempoEstimate::manual(bpm)
            }
            None => self.with_fallback("Tempo estimation", |t| t.estimate_tempo(&features))?.0,
        };
        log::info!("Tempo: {:.1} BPM", tempo.bpm);

        progress.report("Tracking beats", 55);
        let (raw_beats, beat_backend) =
            self.with_fallback("Beat tracking", |t| t.track_beats(&features, tempo.bpm))?;
        let beats = finalize_beats(raw_beats, music_start, features.duration);
        log::info!("Beats: {} (first at {:.3}s)", beats.len(), beats.first().copied().unwrap_or(0.0));

        progress.report("Locating downbeat", 62);
        let (downbeat, _) = self.with_fallback("Downbeat detection", |t| {
            t.find_downbeat(&features, &beats, tempo.bpm, music_start)
        })?;
        log::info!("First downbeat: {:.3}s", downbeat);

        progress.report("Detecting onsets", 68);
        let onsets = detect_onsets(&features);

        Ok(Analysis {
            features,
            music_start,
            tempo,
            beats,
            downbeat,
            onsets,
            beat_backend,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::analysis::tests::click_track;
    use crate::progress::NoProgress;
    use crate::rhythm::tempo::{MAX_BPM, MIN_BPM};

    struct BrokenTracker;

    impl BeatTracker for BrokenTracker {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn estimate_tempo(&self, _: &SpectralFeatures) -> Result<TempoEstimate, TrackerError> {
            Err(TrackerError::NoBeats)
        }

        fn track_beats(&self, _: &SpectralFeatures, _: f32) -> Result<Vec<f32>, TrackerError> {
            Err(TrackerError::NoBeats)
        }

        fn find_downbeat(&self, _: &SpectralFeatures, _: &[f32], _: f32, _: f32) -> Result<f32, TrackerError> {
            Err(TrackerError::NoBeats)
        }
    }

    #[test]
    fn bpm_override_is_validated() {
        assert!(validate_bpm(0.0).is_err());
        assert!(validate_bpm(-5.0).is_err());
        assert!(validate_bpm(300.5).is_err());
        assert!(validate_bpm(f32::NAN).is_err());
        assert_eq!(validate_bpm(300.0), Ok(300.0));
        assert!(AnalysisSession::new(Backend::Auto, Some(400.0)).is_err());
    }

    #[test]
    fn leading_silence_scenario() {
        let wf = click_track(120.0, 60.0, 2.0);
        let session = AnalysisSession::new(Backend::Auto, None).unwrap();
        let a = session.run(&wf, &NoProgress).unwrap();
        assert_eq!(a.beat_backend, "dbn");
        assert!((a.bpm() - 120.0).abs() <= 2.0, "bpm {}", a.bpm());

        assert!(a.music_start > 0.0 && a.music_start < 2.0, "start {}", a.music_start);
        assert!((MIN_BPM..=MAX_BPM).contains(&a.tempo.bpm));
        assert_eq!((a.tempo.bpm * 2.0).fract(), 0.0);
        assert!(!a.beats.is_empty());
        assert!(a.beats.windows(2).all(|w| w[0] < w[1]));
        assert!(a.beats.iter().all(|&b| b >= a.music_start - 1e-4 && b <= a.duration()));
        assert!(a.downbeat <= a.beats[0] + a.measure_seconds());
    }

    #[test]
    fn downbeat_sits_on_the_beat_grid() {
        let wf = click_track(120.0, 20.0, 0.0);
        let session = AnalysisSession::new(Backend::Classical, Some(120.0)).unwrap();
        let a = session.run(&wf, &NoProgress).unwrap();
        let period = 60.0 / a.bpm();
        let offset = (a.beats[0] - a.downbeat).rem_euclid(period);
        assert!(offset < 0.05 || period - offset < 0.05, "offset {}", offset);
        assert!(a.tempo.candidates.is_empty());
    }

    #[test]
    fn failing_tracker_falls_back_to_classical() {
        let wf = click_track(100.0, 12.0, 0.0);
        let session = AnalysisSession::with_tracker(Box::new(BrokenTracker), None).unwrap();
        let a = session.run(&wf, &NoProgress).unwrap();
        assert_eq!(a.beat_backend, "classical");
        assert!(!a.beats.is_empty());
    }
}
