pub mod beat;
pub mod dbn;
pub mod downbeat;
pub mod music_start;
pub mod tempo;
pub mod tracker;
