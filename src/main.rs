mod audio;
mod chart;
mod cli;
mod config;
mod encode;
mod error;
mod progress;
mod report;
mod rhythm;
mod session;

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::Path;

use chart::difficulty::{parse_selection, Difficulty};
use chart::generate::generate_charts;
use chart::sm::{SmWriter, SongInfo};
use cli::Cli;
use encode::ffmpeg::FfmpegVideoConverter;
use progress::{BarProgress, NoProgress, Progress};
use report::AnalysisReport;
use session::AnalysisSession;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    // Load config: explicit --config path, or auto-detect smgen.toml / global config
    let cfg = match config::find_config(cli.config.as_deref()) {
        Some(path) => match config::load_config(&path) {
            Some(cfg) => {
                log::info!("Loaded config from {}", path.display());
                cfg
            }
            None => {
                log::warn!("Failed to load config from {}", path.display());
                config::Config::default()
            }
        },
        None => config::Config::default(),
    };

    // Merge: CLI values win, config fills what the CLI left unset
    let backend = cli.backend.or(cfg.analysis.backend).unwrap_or_default();
    let names: Vec<String> = if !cli.difficulties.is_empty() {
        cli.difficulties.clone()
    } else if !cfg.chart.difficulties.is_empty() {
        cfg.chart.difficulties.clone()
    } else {
        Difficulty::ALL.iter().map(|d| d.name().to_string()).collect()
    };

    // Validate everything before touching the audio
    let difficulties = parse_selection(&names)?;
    let session = AnalysisSession::new(backend, cli.bpm)?;

    let input = &cli.input;
    if !input.exists() {
        anyhow::bail!("Input file not found: {}", input.display());
    }
    if let Some(video) = &cli.video {
        if !video.exists() {
            anyhow::bail!("Video file not found: {}", video.display());
        }
    }
    let output = cli.output.clone().unwrap_or_else(|| input.with_extension("sm"));
    let seed = cli.seed.unwrap_or_else(rand::random);

    log::info!("smgen - StepMania chart generator");
    log::info!("Input: {}", input.display());
    log::info!("Output: {}", output.display());
    log::info!(
        "Difficulties: {}",
        difficulties.iter().map(|d| d.name()).collect::<Vec<_>>().join(", ")
    );
    log::info!("Backend: {}, seed: {}", session.tracker_name(), seed);

    // 1. Decode audio
    log::info!("Decoding audio...");
    let waveform = audio::decode::decode_audio(input, cfg.analysis.sample_rate)?;

    // 2. Analyze: features, music start, tempo, beats, downbeat, onsets
    let progress: Box<dyn Progress> = if std::io::stderr().is_terminal() {
        Box::new(BarProgress::new())
    } else {
        Box::new(NoProgress)
    };
    let analysis = session.run(&waveform, progress.as_ref())?;

    // 3. Generate charts
    progress.report("Generating charts", 72);
    log::info!("Generating {} charts...", difficulties.len());
    let charts = generate_charts(&analysis, &difficulties, seed);

    // 4. Background video
    progress.report("Preparing background video", 90);
    let video = match &cli.video {
        Some(path) if cli.convert_video => {
            let prepared = FfmpegVideoConverter::default().prepare(path)?;
            Some(file_name(&prepared))
        }
        Some(path) => Some(file_name(path)),
        None => None,
    };

    // 5. Serialize and write in one go
    progress.report("Writing chart", 95);
    let title = cli.title.clone().unwrap_or_else(|| file_stem(input));
    let music = cli.music.clone().unwrap_or_else(|| file_name(input));
    let mut info = SongInfo::new(title, music);
    if let Some(artist) = cli.artist.clone().or(cfg.chart.artist) {
        info.artist = artist;
    }
    if let Some(credit) = cfg.chart.credit {
        info.credit = credit;
    }
    info.video = video;
    info.preview_length = cfg.chart.preview_length;
    let text = SmWriter::new(&info, analysis.bpm(), analysis.downbeat, analysis.duration()).render(&charts);
    std::fs::write(&output, text)
        .with_context(|| format!("Failed to write chart file: {}", output.display()))?;

    progress.report("Done", 100);
    progress.finish();

    if let Some(path) = &cli.analysis_json {
        AnalysisReport::new(&analysis, &charts, seed).write(path)?;
    }

    for chart in &charts {
        log::info!(
            "  {:<10} level {:>2}: {} notes ({} jumps)",
            chart.difficulty.name(),
            chart.level,
            chart.note_count(),
            chart.jump_count()
        );
    }
    log::info!("Done! Output: {}", output.display());
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "Untitled".to_string())
}
