use super::stft::Spectrogram;

/// Lowest STFT bins averaged into the bass band (~170 Hz at 22.05 kHz / 2048).
pub const BASS_BINS: usize = 8;

/// Per-session spectral features, all indexed by the same frame grid.
#[derive(Clone, Debug)]
pub struct SpectralFeatures {
    pub sample_rate: u32,
    pub hop_size: usize,
    /// Track length in seconds
    pub duration: f32,
    /// Mel spectrogram in dB relative to peak, `[frame][band]`
    pub mel_db: Vec<Vec<f32>>,
    /// Spectral-flux onset strength, one value per frame
    pub onset_env: Vec<f32>,
    /// RMS energy (linear)
    pub rms: Vec<f32>,
    /// Mean magnitude of the lowest STFT bins
    pub bass: Vec<f32>,
    /// STFT magnitudes
    pub stft: Spectrogram,
    peak_rms: f32,
}

impl SpectralFeatures {
    pub fn new(
        sample_rate: u32,
        hop_size: usize,
        duration: f32,
        mel_db: Vec<Vec<f32>>,
        onset_env: Vec<f32>,
        rms: Vec<f32>,
        stft: Spectrogram,
    ) -> Self {
        let bass = bass_band(&stft);
        let peak_rms = rms.iter().copied().fold(0.0f32, f32::max);
        Self {
            sample_rate,
            hop_size,
            duration,
            mel_db,
            onset_env,
            rms,
            bass,
            stft,
            peak_rms,
        }
    }

    /// Frames per second.
    pub fn frame_rate(&self) -> f32 {
        self.sample_rate as f32 / self.hop_size as f32
    }

    pub fn frame_to_time(&self, frame: usize) -> f32 {
        frame as f32 * self.hop_size as f32 / self.sample_rate as f32
    }

    /// Nearest frame index for `time`, clamped into `[0, len - 1]`.
    pub fn time_to_frame(&self, time: f32, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        let frame = (time * self.frame_rate()).round();
        if frame <= 0.0 {
            0
        } else {
            (frame as usize).min(len - 1)
        }
    }

    pub fn peak_rms(&self) -> f32 {
        self.peak_rms
    }

    /// RMS at `time` normalised by the track's peak (0 for a silent track).
    pub fn rms_at(&self, time: f32) -> f32 {
        if self.rms.is_empty() || self.peak_rms <= 0.0 {
            return 0.0;
        }
        self.rms[self.time_to_frame(time, self.rms.len())] / self.peak_rms
    }

    pub fn onset_strength_at(&self, time: f32) -> f32 {
        if self.onset_env.is_empty() {
            return 0.0;
        }
        self.onset_env[self.time_to_frame(time, self.onset_env.len())]
    }

    pub fn bass_at(&self, time: f32) -> f32 {
        if self.bass.is_empty() {
            return 0.0;
        }
        self.bass[self.time_to_frame(time, self.bass.len())]
    }

    /// Loudest of four mel quartiles at `time`: 0 bass, 1 low-mid, 2 mid-high, 3 high.
    pub fn dominant_band(&self, time: f32) -> usize {
        if self.mel_db.is_empty() {
            return 0;
        }
        let spec = &self.mel_db[self.time_to_frame(time, self.mel_db.len())];
        let n = spec.len();
        let band = (n / 4).max(1);

        let mut best = 0;
        let mut best_energy = f32::NEG_INFINITY;
        for quartile in 0..4 {
            let lo = (quartile * band).min(n);
            let hi = if quartile < 3 { ((quartile + 1) * band).min(n) } else { n };
            if lo >= hi {
                continue;
            }
            let energy = spec[lo..hi].iter().sum::<f32>() / (hi - lo) as f32;
            if energy > best_energy {
                best_energy = energy;
                best = quartile;
            }
        }
        best
    }
}

fn bass_band(stft: &Spectrogram) -> Vec<f32> {
    let bins = BASS_BINS.min(stft.num_bins).max(1);
    stft.frames
        .iter()
        .map(|frame| frame.iter().take(bins).sum::<f32>() / bins as f32)
        .collect()
}
