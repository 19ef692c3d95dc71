use anyhow::{Context, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Transcodes a background video into a silent H.264 MP4 that StepMania plays reliably.
pub struct FfmpegVideoConverter {
    codec: String,
    preset: String,
    pix_fmt: String,
    crf: u32,
}

impl Default for FfmpegVideoConverter {
    fn default() -> Self {
        Self {
            codec: "libx264".into(),
            preset: "medium".into(),
            pix_fmt: "yuv420p".into(),
            crf: 18,
        }
    }
}

impl FfmpegVideoConverter {
    /// Where the converted copy of `input` goes: `<stem>.mp4` beside it, or
    /// `<stem>_smgen.mp4` when the source is already an mp4.
    pub fn output_path(input: &Path) -> PathBuf {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video".to_string());
        let name = if is_mp4(input) {
            format!("{}_smgen.mp4", stem)
        } else {
            format!("{}.mp4", stem)
        };
        input.with_file_name(name)
    }

    /// Background video to reference from the chart: `input` itself when it is already an
    /// H.264 mp4 without audio, otherwise a fresh transcode at [`Self::output_path`].
    pub fn prepare(&self, input: &Path) -> Result<PathBuf> {
        if is_compatible_mp4(input) {
            log::info!("Video already MP4 (H.264) with no audio, no conversion needed");
            return Ok(input.to_path_buf());
        }
        let output = Self::output_path(input);
        self.convert(input, &output)?;
        Ok(output)
    }

    fn args(&self, input: &Path, output: &Path) -> Vec<OsString> {
        let crf = self.crf.to_string();
        let mut args: Vec<OsString> = vec!["-y".into(), "-i".into(), input.into()];
        args.extend(
            [
                "-map", "0:v:0",
                "-c:v", self.codec.as_str(),
                "-preset", self.preset.as_str(),
                "-crf", crf.as_str(),
                "-pix_fmt", self.pix_fmt.as_str(),
                "-an",
                "-movflags", "+faststart",
            ]
            .into_iter()
            .map(OsString::from),
        );
        args.push(output.into());
        args
    }

    pub fn convert(&self, input: &Path, output: &Path) -> Result<()> {
        log::info!("Converting background video {} -> {}", input.display(), output.display());

        let result = Command::new("ffmpeg")
            .args(self.args(input, output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .context("Failed to spawn ffmpeg. Is ffmpeg installed?")?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            anyhow::bail!("FFmpeg exited with error:\n{}", stderr);
        }

        log::info!("FFmpeg conversion complete (codec={}, crf={})", self.codec, self.crf);
        Ok(())
    }
}

fn is_mp4(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("mp4"))
}

/// Ask ffprobe for the codecs of `path`. A missing ffprobe or a failed probe counts as
/// incompatible.
fn is_compatible_mp4(path: &Path) -> bool {
    if !is_mp4(path) {
        return false;
    }
    let video = match probe_codecs(path, "v:0") {
        Some(out) => out,
        None => {
            log::warn!("ffprobe not available; converting video to be safe");
            return false;
        }
    };
    let audio = probe_codecs(path, "a").unwrap_or_default();
    streams_compatible(&video, &audio)
}

fn probe_codecs(path: &Path, selector: &str) -> Option<String> {
    let result = Command::new("ffprobe")
        .args(["-v", "error", "-select_streams", selector])
        .args(["-show_entries", "stream=codec_name"])
        .args(["-of", "default=nokey=1:noprint_wrappers=1"])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .ok()?;
    if !result.status.success() {
        log::debug!("ffprobe failed on {}", path.display());
        return Some(String::new());
    }
    Some(String::from_utf8_lossy(&result.stdout).into_owned())
}

/// Video stream is H.264 and there are no audio streams.
fn streams_compatible(video_codec: &str, audio_codecs: &str) -> bool {
    video_codec.trim().eq_ignore_ascii_case("h264") && audio_codecs.trim().is_empty()
}
