use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::audio::decode::ANALYSIS_SAMPLE_RATE;
use crate::chart::sm::DEFAULT_PREVIEW_LENGTH;
use crate::rhythm::tracker::Backend;

const CONFIG_NAME: &str = "smgen";

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub chart: ChartConfig,
}

#[derive(Debug, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default)]
    pub backend: Option<Backend>,
}

#[derive(Debug, Deserialize)]
pub struct ChartConfig {
    #[serde(default)]
    pub difficulties: Vec<String>,
    #[serde(default)]
    pub artist: Option<String>,
    #[serde(default)]
    pub credit: Option<String>,
    #[serde(default = "default_preview_length")]
    pub preview_length: f32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            backend: None,
        }
    }
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            difficulties: Vec::new(),
            artist: None,
            credit: None,
            preview_length: default_preview_length(),
        }
    }
}

fn default_sample_rate() -> u32 { ANALYSIS_SAMPLE_RATE }
fn default_preview_length() -> f32 { DEFAULT_PREVIEW_LENGTH }

/// Explicit path, or the first of `./smgen.toml`, `~/.config/smgen/config.toml` and the
/// platform config dir that exists.
pub fn find_config(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = PathBuf::from(format!("{}.toml", CONFIG_NAME));
    if local.exists() {
        return Some(local);
    }
    if let Some(home) = dirs::home_dir() {
        let xdg = home.join(".config").join(CONFIG_NAME).join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }
    if let Some(config_dir) = dirs::config_dir() {
        let platform = config_dir.join(CONFIG_NAME).join("config.toml");
        if platform.exists() {
            return Some(platform);
        }
    }
    None
}

pub fn load_config(path: &Path) -> Option<Config> {
    let content = std::fs::read_to_string(path).ok()?;
    parse_config(&content)
}

fn parse_config(content: &str) -> Option<Config> {
    match toml::from_str(content) {
        Ok(cfg) => Some(cfg),
        Err(err) => {
            log::debug!("Config parse error: {}", err);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg.analysis.sample_rate, 22050);
        assert_eq!(cfg.analysis.backend, None);
        assert!(cfg.chart.difficulties.is_empty());
        assert_eq!(cfg.chart.preview_length, 15.0);
    }

    #[test]
    fn sections_are_read() {
        let cfg = parse_config(
            r#"
            [analysis]
            backend = "classical"

            [chart]
            difficulties = ["Easy", "Hard"]
            artist = "Someone"
            preview_length = 12.5
            "#,
        )
        .unwrap();
        assert_eq!(cfg.analysis.backend, Some(Backend::Classical));
        assert_eq!(cfg.chart.difficulties, vec!["Easy", "Hard"]);
        assert_eq!(cfg.chart.artist.as_deref(), Some("Someone"));
        assert_eq!(cfg.chart.preview_length, 12.5);
    }

    #[test]
    fn malformed_config_is_rejected() {
        assert!(parse_config("[analysis]\nbackend = \"neural\"").is_none());
    }

    #[test]
    fn backend_is_case_insensitive() {
        let cfg = parse_config("[analysis]\nbackend = \"Auto\"").unwrap();
        assert_eq!(cfg.analysis.backend, Some(Backend::Auto));
    }

    #[test]
    fn explicit_path_wins() {
        let p = Path::new("/tmp/custom.toml");
        assert_eq!(find_config(Some(p)), Some(p.to_path_buf()));
    }
}
