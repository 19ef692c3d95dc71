use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

use crate::chart::{Chart, SubdivisionBreakdown};
use crate::rhythm::tempo::TempoEstimate;
use crate::session::Analysis;

/// Machine-readable summary of one run, written with `--analysis-json`.
#[derive(Debug, Serialize)]
pub struct AnalysisReport<'a> {
    pub duration: f32,
    pub sample_rate: u32,
    pub music_start: f32,
    pub tempo: &'a TempoEstimate,
    pub backend: &'a str,
    pub beat_count: usize,
    pub beats: &'a [f32],
    pub downbeat: f32,
    pub onset_count: usize,
    pub seed: u64,
    pub charts: Vec<ChartSummary>,
}

#[derive(Debug, Serialize)]
pub struct ChartSummary {
    pub difficulty: &'static str,
    pub level: u8,
    pub measures: usize,
    pub notes: usize,
    pub jumps: usize,
    pub subdivisions: SubdivisionBreakdown,
}

impl From<&Chart> for ChartSummary {
    fn from(chart: &Chart) -> Self {
        Self {
            difficulty: chart.difficulty.name(),
            level: chart.level,
            measures: chart.measures.len(),
            notes: chart.note_count(),
            jumps: chart.jump_count(),
            subdivisions: chart.subdivision_breakdown(),
        }
    }
}

impl<'a> AnalysisReport<'a> {
    pub fn new(analysis: &'a Analysis, charts: &[Chart], seed: u64) -> Self {
        Self {
            duration: analysis.duration(),
            sample_rate: analysis.features.sample_rate,
            music_start: analysis.music_start,
            tempo: &analysis.tempo,
            backend: analysis.beat_backend,
            beat_count: analysis.beats.len(),
            beats: &analysis.beats,
            downbeat: analysis.downbeat,
            onset_count: analysis.onsets.len(),
            seed,
            charts: charts.iter().map(ChartSummary::from).collect(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialise analysis report")
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?)
            .with_context(|| format!("Failed to write analysis report: {}", path.display()))?;
        log::info!("Analysis report written to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::difficulty::Difficulty;
    use crate::chart::generate::{generate_charts, tests::steady_analysis};

    #[test]
    fn report_lists_every_chart() {
        let analysis = steady_analysis(12.0, 1.0);
        let charts = generate_charts(&analysis, &[Difficulty::Easy, Difficulty::Hard], 3);
        let json = AnalysisReport::new(&analysis, &charts, 3).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["tempo"]["bpm"], 120.0);
        assert_eq!(value["backend"], "classical");
        assert_eq!(value["beat_count"].as_u64(), Some(analysis.beats.len() as u64));
        let names: Vec<&str> = value["charts"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|c| c["difficulty"].as_str())
            .collect();
        assert_eq!(names, vec!["Easy", "Hard"]);
        assert!(value["charts"][1]["subdivisions"]["quarter"].as_u64().is_some());
    }
}
