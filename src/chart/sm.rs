//! StepMania `.sm` serialisation.

use std::fmt::Write as _;

use super::Chart;

pub const DEFAULT_CREDIT: &str = "Auto-generated by smgen";
pub const DEFAULT_ARTIST: &str = "Unknown Artist";
pub const DEFAULT_PREVIEW_LENGTH: f32 = 15.0;

/// Preview starts this far into the song.
const PREVIEW_START_FRACTION: f64 = 0.3;
const RADAR_PLACEHOLDER: &str = "0.000000,0.000000,0.000000,0.000000,0.000000";

/// File-level tags that do not come from analysis.
#[derive(Clone, Debug, PartialEq)]
pub struct SongInfo {
    pub title: String,
    pub artist: String,
    pub credit: String,
    /// `#MUSIC` file name, relative to the chart
    pub music: String,
    /// Background video file name for `#BGCHANGES`
    pub video: Option<String>,
    pub preview_length: f32,
}

impl SongInfo {
    pub fn new(title: impl Into<String>, music: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            artist: DEFAULT_ARTIST.to_string(),
            credit: DEFAULT_CREDIT.to_string(),
            music: music.into(),
            video: None,
            preview_length: DEFAULT_PREVIEW_LENGTH,
        }
    }
}

/// Renders a song and its charts. Pure: the same inputs always give the same text.
pub struct SmWriter<'a> {
    info: &'a SongInfo,
    bpm: f32,
    downbeat: f32,
    duration: f32,
}

impl<'a> SmWriter<'a> {
    pub fn new(info: &'a SongInfo, bpm: f32, downbeat: f32, duration: f32) -> Self {
        Self {
            info,
            bpm,
            downbeat,
            duration,
        }
    }

    pub fn render(&self, charts: &[Chart]) -> String {
        let mut out = self.header();
        let mut ordered: Vec<&Chart> = charts.iter().collect();
        ordered.sort_by_key(|c| c.difficulty);
        for chart in ordered {
            out.push_str(&note_block(chart));
        }
        out
    }

    fn header(&self) -> String {
        let offset = format_offset(self.downbeat);
        let bgchanges = match &self.info.video {
            Some(video) => format!("0.000000={}=1.000000=0=0=0=0", tag_value(video)),
            None => String::new(),
        };

        let mut out = String::new();
        let tags: [(&str, String); 20] = [
            ("TITLE", tag_value(&self.info.title)),
            ("SUBTITLE", String::new()),
            ("ARTIST", tag_value(&self.info.artist)),
            ("TITLETRANSLIT", String::new()),
            ("SUBTITLETRANSLIT", String::new()),
            ("ARTISTTRANSLIT", String::new()),
            ("GENRE", String::new()),
            ("CREDIT", tag_value(&self.info.credit)),
            ("BANNER", String::new()),
            ("BACKGROUND", String::new()),
            ("LYRICSPATH", String::new()),
            ("CDTITLE", String::new()),
            ("MUSIC", tag_value(&self.info.music)),
            ("OFFSET", offset),
            ("SAMPLESTART", format!("{:.6}", self.duration as f64 * PREVIEW_START_FRACTION)),
            ("SAMPLELENGTH", format!("{:.6}", self.info.preview_length)),
            ("SELECTABLE", "YES".to_string()),
            ("BPMS", format!("0.000000={:.6}", self.bpm)),
            ("STOPS", String::new()),
            ("BGCHANGES", bgchanges),
        ];
        for (tag, value) in tags {
            let _ = writeln!(out, "#{}:{};", tag, value);
        }
        out
    }
}

fn note_block(chart: &Chart) -> String {
    let name = chart.difficulty.name();
    let mut out = String::new();
    let _ = write!(
        out,
        "\n//---------------dance-single - {name}---------------\n\
         #NOTES:\n     dance-single:\n     :\n     {name}:\n     {level}:\n     {RADAR_PLACEHOLDER}:\n",
        level = chart.level,
    );

    let measures: Vec<String> = chart
        .measures
        .iter()
        .map(|m| m.rows.iter().map(|r| r.to_sm()).collect::<Vec<_>>().join("\n"))
        .collect();
    out.push_str(&measures.join("\n,\n"));
    out.push_str("\n;\n");
    out
}

/// Tag values cannot carry the format's delimiters.
fn tag_value(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            ';' | ':' | '#' | '\n' | '\r' => '_',
            c => c,
        })
        .collect()
}

/// `-downbeat` to 6 places; anything that rounds to zero prints unsigned.
fn format_offset(downbeat: f32) -> String {
    let text = format!("{:.6}", -downbeat);
    match text.strip_prefix('-') {
        Some(rest) if rest.bytes().all(|b| b == b'0' || b == b'.') => rest.to_string(),
        _ => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::difficulty::Difficulty;
    use crate::chart::{Measure, Row, DOWN, LEFT, RIGHT};

    fn chart(difficulty: Difficulty) -> Chart {
        let mut first = Measure::empty(4);
        first.rows[0] = Row::tap(LEFT);
        first.rows[2] = Row::tap(DOWN);
        first.rows[2].set(RIGHT);
        let config = difficulty.config();
        Chart {
            difficulty,
            level: config.level,
            subdivision: 4,
            measures: vec![first, Measure::empty(4)],
        }
    }

    fn info() -> SongInfo {
        SongInfo::new("My Song", "my song.ogg")
    }

    #[test]
    fn header_fields_in_order() {
        let info = info();
        let text = SmWriter::new(&info, 128.0, 0.25, 100.0).render(&[]);
        let expected = "#TITLE:My Song;\n#SUBTITLE:;\n#ARTIST:Unknown Artist;\n#TITLETRANSLIT:;\n\
            #SUBTITLETRANSLIT:;\n#ARTISTTRANSLIT:;\n#GENRE:;\n#CREDIT:Auto-generated by smgen;\n\
            #BANNER:;\n#BACKGROUND:;\n#LYRICSPATH:;\n#CDTITLE:;\n#MUSIC:my song.ogg;\n\
            #OFFSET:-0.250000;\n#SAMPLESTART:30.000000;\n#SAMPLELENGTH:15.000000;\n#SELECTABLE:YES;\n\
            #BPMS:0.000000=128.000000;\n#STOPS:;\n#BGCHANGES:;\n";
        assert_eq!(text, expected);
    }

    #[test]
    fn zero_downbeat_has_unsigned_offset() {
        let info = info();
        let text = SmWriter::new(&info, 120.0, 0.0, 10.0).render(&[]);
        assert!(text.contains("#OFFSET:0.000000;\n"));
    }

    #[test]
    fn tiny_downbeat_has_unsigned_offset() {
        assert_eq!(format_offset(3e-7), "0.000000");
        assert_eq!(format_offset(-3e-7), "0.000000");
        assert_eq!(format_offset(1.25), "-1.250000");
        assert_eq!(format_offset(0.0), "0.000000");
    }

    #[test]
    fn video_goes_into_bgchanges() {
        let mut info = info();
        info.video = Some("clip.mp4".into());
        let text = SmWriter::new(&info, 120.0, 0.0, 10.0).render(&[]);
        assert!(text.contains("#BGCHANGES:0.000000=clip.mp4=1.000000=0=0=0=0;\n"));
    }

    #[test]
    fn note_block_layout() {
        let info = info();
        let text = SmWriter::new(&info, 120.0, 0.0, 10.0).render(&[chart(Difficulty::Easy)]);
        let block = "\n//---------------dance-single - Easy---------------\n#NOTES:\n     dance-single:\n     :\n     \
            Easy:\n     3:\n     0.000000,0.000000,0.000000,0.000000,0.000000:\n\
            1000\n0000\n0101\n0000\n,\n0000\n0000\n0000\n0000\n;\n";
        assert!(text.ends_with(block), "{}", text);
    }

    #[test]
    fn blocks_follow_canonical_order() {
        let info = info();
        let charts = [chart(Difficulty::Challenge), chart(Difficulty::Beginner), chart(Difficulty::Medium)];
        let text = SmWriter::new(&info, 120.0, 0.0, 10.0).render(&charts);
        let pos = |name: &str| text.find(&format!("dance-single - {}-", name)).unwrap();
        assert!(pos("Beginner") < pos("Medium"));
        assert!(pos("Medium") < pos("Challenge"));
        assert_eq!(text.matches("#NOTES:").count(), 3);
    }

    #[test]
    fn rendering_is_idempotent() {
        let info = info();
        let charts = [chart(Difficulty::Hard), chart(Difficulty::Easy)];
        let writer = SmWriter::new(&info, 143.5, 1.234567, 200.0);
        assert_eq!(writer.render(&charts), writer.render(&charts));
    }

    #[test]
    fn delimiters_are_escaped() {
        let mut info = info();
        info.title = "A;B:C".into();
        let text = SmWriter::new(&info, 120.0, 0.0, 10.0).render(&[]);
        assert!(text.starts_with("#TITLE:A_B_C;\n"));
    }
}
