use crate::audio::features::SpectralFeatures;

/// Fraction of the peak RMS a frame must exceed to count as music.
const START_THRESHOLD: f32 = 0.05;
/// Step back this far so the first attack is not clipped.
const SAFETY_MARGIN: f32 = 0.05;

/// Time of the first frame louder than 5% of the track's peak RMS, minus a 50 ms margin.
///
/// Returns 0 when nothing crosses the threshold.
pub fn detect_music_start(features: &SpectralFeatures) -> f32 {
    let threshold = features.peak_rms() * START_THRESHOLD;
    let start = features
        .rms
        .iter()
        .position(|&r| r > threshold)
        .map(|frame| features.frame_to_time(frame))
        .unwrap_or(0.0);

    let start = (start - SAFETY_MARGIN).max(0.0);
    log::info!("Music starts at {:.3}s", start);
    start
}
