use super::decode::Waveform;
use super::features::SpectralFeatures;
use super::hpss;
use super::mel::{self, MEL_FMAX, N_MELS};
use super::onset::{self, OnsetEvent, PeakPick};
use super::stft::{self, FFT_SIZE, HOP_SIZE};

/// RMS frame length; shares the STFT hop so every feature lives on one frame grid.
const RMS_FRAME: usize = 2048;

/// Frames by which centred windows lead the true onset.
const CENTER_SHIFT: usize = FFT_SIZE / (2 * HOP_SIZE);

/// Compute every spectral feature the rhythm and chart stages need.
pub fn extract_features(waveform: &Waveform) -> SpectralFeatures {
    let samples = waveform.samples();
    let sr = waveform.sample_rate();

    log::info!("Pass 1: STFT ({} samples, n_fft={}, hop={})...", samples.len(), FFT_SIZE, HOP_SIZE);
    let spec = stft::stft_magnitude(samples, FFT_SIZE, HOP_SIZE);

    log::info!("Pass 2: Mel spectrogram & onset envelope ({} bands)...", N_MELS);
    let filters = mel::mel_filterbank(sr, FFT_SIZE, N_MELS, MEL_FMAX);
    let mel_db = mel::mel_db(&spec, &filters);
    let onset_env = onset::onset_strength(&mel_db, CENTER_SHIFT);

    log::info!("Pass 3: RMS envelope...");
    let rms = stft::rms_envelope(samples, RMS_FRAME, HOP_SIZE);

    let features = SpectralFeatures::new(sr, HOP_SIZE, waveform.duration(), mel_db, onset_env, rms, spec);
    log::info!(
        "Features: {} frames ({:.2} fps), peak_rms={:.4}",
        features.onset_env.len(),
        features.frame_rate(),
        features.peak_rms()
    );
    features
}

/// Onset envelope of the percussive component only.
pub fn percussive_onset_env(features: &SpectralFeatures) -> Vec<f32> {
    let perc = hpss::percussive(&features.stft);
    let filters = mel::mel_filterbank(features.sample_rate, FFT_SIZE, N_MELS, MEL_FMAX);
    let mel_db = mel::mel_db(&perc, &filters);
    onset::onset_strength(&mel_db, CENTER_SHIFT)
}

/// Discrete onsets over the whole track, denser than and independent of the beat grid.
pub fn detect_onsets(features: &SpectralFeatures) -> Vec<OnsetEvent> {
    let env = &features.onset_env;
    let frames = onset::detect_onset_frames(env, PeakPick::for_frame_rate(features.frame_rate()));
    let events = onset::onset_events(env, &frames, |f| features.frame_to_time(f));
    log::info!("Found {} onsets", events.len());
    events
}
