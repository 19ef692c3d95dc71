use clap::Parser;
use std::path::PathBuf;

use crate::rhythm::tracker::Backend;

#[derive(Parser, Debug)]
#[command(name = "smgen", about = "StepMania chart generator: beat-tracks a song and writes a .sm file")]
pub struct Cli {
    /// Input audio file (WAV, MP3, FLAC, OGG, AAC)
    pub input: PathBuf,

    /// Output chart file (defaults to <input stem>.sm beside the input)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Song title (defaults to the input file stem)
    #[arg(long)]
    pub title: Option<String>,

    #[arg(long)]
    pub artist: Option<String>,

    /// Manual tempo override in BPM, skips tempo estimation (0-300]
    #[arg(long)]
    pub bpm: Option<f32>,

    /// Random seed for reproducible charts
    #[arg(long)]
    pub seed: Option<u64>,

    /// Difficulties to generate (comma-separated: Beginner,Easy,Medium,Hard,Challenge)
    #[arg(short, long, value_delimiter = ',')]
    pub difficulties: Vec<String>,

    /// Beat tracker backend: auto, dbn or classical
    #[arg(long)]
    pub backend: Option<Backend>,

    /// Background video referenced from the chart
    #[arg(long)]
    pub video: Option<PathBuf>,

    /// Transcode the background video to a silent H.264 MP4 with ffmpeg
    #[arg(long, requires = "video")]
    pub convert_video: bool,

    /// File name written to #MUSIC (defaults to the input file name)
    #[arg(long)]
    pub music: Option<String>,

    /// Write tempo, beats and chart statistics as JSON
    #[arg(long)]
    pub analysis_json: Option<PathBuf>,

    /// Config file (defaults to ./smgen.toml or the user config dir)
    #[arg(long)]
    pub config: Option<PathBuf>,
}
