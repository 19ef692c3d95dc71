pub mod analysis;
pub mod decode;
pub mod features;
pub mod hpss;
pub mod mel;
pub mod onset;
pub mod stft;
