//! Media tool boundary and its ffmpeg implementation.
//!
//! The mixing pipeline only ever calls the four [`MediaTool`] operations.
//! [`Ffmpeg`] runs `ffmpeg`/`ffprobe` as subprocesses with argument vectors;
//! filter graphs are rendered from typed values.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::tempo::{MAX_STAGE_FACTOR, MIN_STAGE_FACTOR};

/// Sample rate ffmpeg resamples extracted and mixed audio to.
pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;

/// Longest stderr excerpt carried in a [`Error::MediaTool`].
const STDERR_EXCERPT: usize = 1000;

/// One input of a [`MediaTool::merge`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MixTrack {
    pub path: PathBuf,
    /// Placement on the output timeline.
    pub delay_ms: u64,
    /// Audio past this length is cut before placement.
    pub max_duration_ms: u64,
}

impl MixTrack {
    pub fn end_ms(&self) -> u64 {
        self.delay_ms + self.max_duration_ms
    }
}

/// Operations the mix pipeline needs from an audio toolkit.
#[async_trait::async_trait]
pub trait MediaTool: Send + Sync {
    /// Duration of a media file in milliseconds.
    async fn duration_ms(&self, path: &Path) -> Result<u64>;

    /// Copy `duration_ms` of `input`, starting at `start_ms`, to `output`.
    async fn extract(&self, input: &Path, start_ms: u64, duration_ms: u64, output: &Path) -> Result<()>;

    /// Write `input` played `factor` times faster to `output`.
    ///
    /// `factor` must lie within [0.5, 2.0]; longer speed-ups are chained by
    /// the caller.
    async fn change_tempo(&self, input: &Path, factor: f64, output: &Path) -> Result<()>;

    /// Mix `tracks` onto silence, producing exactly `total_duration_ms` of audio.
    async fn merge(&self, tracks: &[MixTrack], total_duration_ms: u64, output: &Path) -> Result<()>;
}

/// Reject a single-stage tempo factor outside the supported range.
pub fn check_tempo_factor(factor: f64) -> Result<()> {
    if factor.is_finite() && (MIN_STAGE_FACTOR..=MAX_STAGE_FACTOR).contains(&factor) {
        Ok(())
    } else {
        Err(Error::InvalidOption(format!(
            "tempo factor must be within [{MIN_STAGE_FACTOR}, {MAX_STAGE_FACTOR}], got {factor}"
        )))
    }
}

/// ffmpeg/ffprobe-backed [`MediaTool`].
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    sample_rate: u32,
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

impl Ffmpeg {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample_rate(mut self, rate: u32) -> Result<Self> {
        if rate == 0 {
            return Err(Error::InvalidOption("sample_rate must be > 0".into()));
        }
        self.sample_rate = rate;
        Ok(self)
    }

    /// Use specific binaries instead of looking them up on `PATH`.
    pub fn binaries(mut self, ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        self.ffmpeg = ffmpeg.into();
        self.ffprobe = ffprobe.into();
        self
    }

    /// Extract the audio track of `video` as mono PCM WAV.
    pub async fn extract_audio(&self, video: &Path, output: &Path) -> Result<()> {
        require_file(video)?;
        info!(video = %video.display(), "extracting audio");
        let args = FfmpegArgs::new()
            .input(video)
            .output_args(["-vn", "-acodec", "pcm_s16le"])
            .mono(self.sample_rate)
            .build(output);
        run(&self.ffmpeg, "ffmpeg", &args).await.map(drop)
    }

    /// Replace the audio of `video` with `audio`, copying the video stream.
    pub async fn replace_audio(&self, video: &Path, audio: &Path, output: &Path) -> Result<()> {
        require_file(video)?;
        require_file(audio)?;
        info!(video = %video.display(), audio = %audio.display(), "replacing audio track");
        let args = replace_audio_args(video, audio, output);
        run(&self.ffmpeg, "ffmpeg", &args).await.map(drop)
    }
}

#[async_trait::async_trait]
impl MediaTool for Ffmpeg {
    async fn duration_ms(&self, path: &Path) -> Result<u64> {
        require_file(path)?;
        let mut args: Vec<OsString> = ["-v", "quiet", "-print_format", "json", "-show_format"]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.push(path.into());
        let stdout = run(&self.ffprobe, "ffprobe", &args).await?;
        parse_probe_duration(&stdout)
    }

    async fn extract(&self, input: &Path, start_ms: u64, duration_ms: u64, output: &Path) -> Result<()> {
        require_file(input)?;
        let args = FfmpegArgs::new()
            .input_args(["-ss".into(), secs(start_ms)])
            .input(input)
            .output_args(["-t".into(), secs(duration_ms)])
            .mono(self.sample_rate)
            .build(output);
        run(&self.ffmpeg, "ffmpeg", &args).await.map(drop)
    }

    async fn change_tempo(&self, input: &Path, factor: f64, output: &Path) -> Result<()> {
        check_tempo_factor(factor)?;
        require_file(input)?;
        let args = FfmpegArgs::new()
            .input(input)
            .output_args(["-filter:a".to_string(), atempo_filter(factor)])
            .mono(self.sample_rate)
            .build(output);
        run(&self.ffmpeg, "ffmpeg", &args).await.map(drop)
    }

    async fn merge(&self, tracks: &[MixTrack], total_duration_ms: u64, output: &Path) -> Result<()> {
        for track in tracks {
            require_file(&track.path)?;
        }
        info!(tracks = tracks.len(), total_duration_ms, "merging audio tracks");
        let args = merge_args(tracks, total_duration_ms, self.sample_rate, output);
        run(&self.ffmpeg, "ffmpeg", &args).await.map(drop)
    }
}

/// Argument vector builder for one ffmpeg invocation.
#[derive(Debug, Default)]
struct FfmpegArgs {
    inputs: Vec<OsString>,
    output_args: Vec<OsString>,
}

impl FfmpegArgs {
    fn new() -> Self {
        Self::default()
    }

    /// Arguments applying to the next input.
    fn input_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.inputs.extend(args.into_iter().map(Into::into));
        self
    }

    fn input(mut self, path: &Path) -> Self {
        self.inputs.push("-i".into());
        self.inputs.push(path.into());
        self
    }

    fn output_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.output_args.extend(args.into_iter().map(Into::into));
        self
    }

    fn mono(self, sample_rate: u32) -> Self {
        self.output_args(["-ac".to_string(), "1".into(), "-ar".into(), sample_rate.to_string()])
    }

    fn build(self, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-y", "-nostdin", "-v", "error"]
            .into_iter()
            .map(OsString::from)
            .collect();
        args.extend(self.inputs);
        args.extend(self.output_args);
        args.push(output.into());
        args
    }
}

/// Milliseconds as ffmpeg seconds with millisecond precision.
fn secs(ms: u64) -> String {
    format!("{}.{:03}", ms / 1000, ms % 1000)
}

/// `atempo` filter for one stage.
pub fn atempo_filter(factor: f64) -> String {
    format!("atempo={factor:.6}")
}

/// Filter graph placing each track over a silent base of `total_duration_ms`.
///
/// Input 0 is the silent base; track `k` is input `k + 1`. Each track is
/// resampled to mono, trimmed to its maximum duration and delayed. `amix`
/// runs without normalization so levels are unchanged, and `duration=first`
/// pins the output to the base length.
pub fn merge_filter_graph(tracks: &[MixTrack], sample_rate: u32) -> String {
    if tracks.is_empty() {
        return "[0:a]anull[out]".to_string();
    }

    let mut parts: Vec<String> = tracks
        .iter()
        .enumerate()
        .map(|(k, track)| {
            format!(
                "[{input}:a]aresample={sample_rate},aformat=channel_layouts=mono,\
                 atrim=end={end},asetpts=PTS-STARTPTS,adelay=delays={delay}:all=1[t{k}]",
                input = k + 1,
                end = secs(track.max_duration_ms),
                delay = track.delay_ms,
            )
        })
        .collect();

    let labels: String = (0..tracks.len()).map(|k| format!("[t{k}]")).collect();
    parts.push(format!(
        "[0:a]{labels}amix=inputs={}:duration=first:dropout_transition=0:normalize=0[out]",
        tracks.len() + 1
    ));
    parts.join(";")
}

fn merge_args(tracks: &[MixTrack], total_duration_ms: u64, sample_rate: u32, output: &Path) -> Vec<OsString> {
    let total = secs(total_duration_ms);
    let mut builder = FfmpegArgs::new().input_args([
        "-f".to_string(),
        "lavfi".into(),
        "-t".into(),
        total.clone(),
        "-i".into(),
        format!("anullsrc=r={sample_rate}:cl=mono"),
    ]);
    for track in tracks {
        builder = builder.input(&track.path);
    }
    builder
        .output_args([
            "-filter_complex".to_string(),
            merge_filter_graph(tracks, sample_rate),
            "-map".into(),
            "[out]".into(),
            "-t".into(),
            total,
            "-c:a".into(),
            "pcm_s16le".into(),
        ])
        .mono(sample_rate)
        .build(output)
}

fn replace_audio_args(video: &Path, audio: &Path, output: &Path) -> Vec<OsString> {
    FfmpegArgs::new()
        .input(video)
        .input(audio)
        .output_args([
            "-map", "0:v:0", "-map", "1:a:0", "-c:v", "copy", "-c:a", "aac", "-b:a", "192k", "-shortest",
        ])
        .build(output)
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    format: ProbeFormat,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Read `format.duration` (seconds) from ffprobe JSON output.
fn parse_probe_duration(stdout: &[u8]) -> Result<u64> {
    let probe: ProbeOutput = serde_json::from_slice(stdout)?;
    let raw = probe
        .format
        .duration
        .ok_or_else(|| Error::MediaTool("ffprobe reported no duration".into()))?;
    let seconds: f64 = raw
        .trim()
        .parse()
        .map_err(|_| Error::MediaTool(format!("invalid duration from ffprobe: \"{raw}\"")))?;
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(Error::MediaTool(format!("invalid duration from ffprobe: \"{raw}\"")));
    }
    Ok((seconds * 1000.0).round() as u64)
}

fn require_file(path: &Path) -> Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(Error::AudioNotFound {
            path: path.to_path_buf(),
        })
    }
}

async fn run(program: &Path, tool: &'static str, args: &[OsString]) -> Result<Vec<u8>> {
    debug!(
        tool,
        args = %args.iter().map(|a| a.to_string_lossy()).collect::<Vec<_>>().join(" "),
        "running media tool"
    );

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::ToolNotFound { tool }
            } else {
                Error::MediaTool(format!("failed to run {tool}: {e}"))
            }
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let excerpt: String = stderr.trim().chars().take(STDERR_EXCERPT).collect();
        return Err(Error::MediaTool(format!("{tool} failed ({}): {excerpt}", output.status)));
    }

    Ok(output.stdout)
}
