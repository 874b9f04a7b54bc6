//! Transcoder argument mapping and invocation.
//!
//! [`build_args`] is a pure mapping from (input kind, output format,
//! options) to ffmpeg arguments. [`transcode`] runs it under a timeout and
//! folds tool failures into [`Error::Transcode`].

use std::path::Path;
use std::time::Duration;

use mf_core::{ConversionOptions, Error, MediaKind, OutputFormat, Result};
use serde_json::Value;

use crate::tools::ToolRegistry;

const DEFAULT_AUDIO_BITRATE: &str = "192k";
const DEFAULT_FLAC_COMPRESSION: &str = "5";
const DEFAULT_OGG_QUALITY: &str = "5";
const DEFAULT_VIDEO_CODEC: &str = "libx264";
const DEFAULT_CRF: &str = "23";
const DEFAULT_PRESET: &str = "medium";
const VIDEO_AUDIO_BITRATE: &str = "128k";

/// One conversion to run.
#[derive(Debug, Clone, Copy)]
pub struct TranscodeRequest<'a> {
    pub input: &'a Path,
    pub output: &'a Path,
    /// Kind detected from the input name; `None` when unknown.
    pub input_kind: Option<MediaKind>,
    pub format: OutputFormat,
    pub options: &'a ConversionOptions,
}

/// Read an option as a string, accepting JSON strings and numbers.
fn opt(options: &ConversionOptions, key: &str, default: &str) -> String {
    match options.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => default.to_string(),
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// ffmpeg arguments for `req`, excluding the program itself.
pub fn build_args(req: &TranscodeRequest<'_>) -> Vec<String> {
    let o = req.options;
    let mut args = strings(&["-i", &req.input.to_string_lossy(), "-y"]);

    let codec_args = match req.format {
        OutputFormat::Mp3 => strings(&[
            "-codec:a",
            "libmp3lame",
            "-b:a",
            &opt(o, "bitrate", DEFAULT_AUDIO_BITRATE),
        ]),
        OutputFormat::Flac => strings(&[
            "-codec:a",
            "flac",
            "-compression_level",
            &opt(o, "compression", DEFAULT_FLAC_COMPRESSION),
        ]),
        OutputFormat::Wav => strings(&["-codec:a", "pcm_s16le"]),
        OutputFormat::Aac | OutputFormat::M4a => strings(&[
            "-codec:a",
            "aac",
            "-b:a",
            &opt(o, "bitrate", DEFAULT_AUDIO_BITRATE),
        ]),
        OutputFormat::Ogg => strings(&[
            "-codec:a",
            "libvorbis",
            "-q:a",
            &opt(o, "quality", DEFAULT_OGG_QUALITY),
        ]),
        OutputFormat::Mp4 | OutputFormat::Flv => {
            let mut v = x264_family(o);
            v.extend(strings(&["-b:a", VIDEO_AUDIO_BITRATE]));
            v
        }
        OutputFormat::Avi => strings(&[
            "-codec:v",
            "mpeg4",
            "-q:v",
            "5",
            "-codec:a",
            "libmp3lame",
            "-b:a",
            VIDEO_AUDIO_BITRATE,
        ]),
        OutputFormat::Mkv | OutputFormat::Mov => x264_family(o),
        OutputFormat::Webm => strings(&[
            "-codec:v",
            "libvpx-vp9",
            "-crf",
            &opt(o, "crf", DEFAULT_CRF),
            "-b:v",
            "0",
            "-codec:a",
            "libopus",
        ]),
    };
    args.extend(codec_args);

    // Extracting audio from a video container: drop the picture stream.
    if req.format.kind() == MediaKind::Audio && req.input_kind == Some(MediaKind::Video) {
        args.push("-vn".to_string());
    }

    args.push(req.output.to_string_lossy().into_owned());
    args
}

fn x264_family(o: &ConversionOptions) -> Vec<String> {
    strings(&[
        "-codec:v",
        &opt(o, "video_codec", DEFAULT_VIDEO_CODEC),
        "-crf",
        &opt(o, "crf", DEFAULT_CRF),
        "-preset",
        &opt(o, "preset", DEFAULT_PRESET),
        "-codec:a",
        "aac",
    ])
}

/// Run the conversion described by `req`.
///
/// Non-zero exit, crash, or a missing transcoder become
/// [`Error::Transcode`] carrying the diagnostic output; exceeding `timeout`
/// kills the process and yields [`Error::Timeout`].
pub async fn transcode(
    tools: &ToolRegistry,
    req: &TranscodeRequest<'_>,
    timeout: Duration,
) -> Result<()> {
    let mut cmd = tools
        .command("ffmpeg")
        .map_err(|e| Error::Transcode(e.to_string()))?;
    cmd.args(build_args(req)).timeout(timeout);

    match cmd.execute().await {
        Ok(_) => Ok(()),
        Err(Error::Tool { message, .. }) => Err(Error::Transcode(message)),
        Err(e) => Err(e),
    }
}
