//! Requested output options and the allow-listed ffmpeg argument template built from them.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::common::error::TranscodeError;

pub const ALLOWED_BITRATES_KBPS: [u32; 7] = [64, 96, 128, 160, 192, 256, 320];
pub const ALLOWED_SAMPLE_RATES: [u32; 5] = [8000, 16000, 22050, 44100, 48000];
pub const ALLOWED_CHANNELS: [u8; 2] = [1, 2];
pub const MAX_TRIM_SECS: f64 = 86_400.0;
pub const MAX_PREFIX_LEN: usize = 64;
pub const ALLOWED_SEGMENT_SECS: [u32; 8] = [60, 120, 180, 300, 600, 900, 1200, 1800];

/// File name prefix of the parts a segmented run writes.
pub const SEGMENT_PREFIX: &str = "part_";

const DEFAULT_BITRATE_KBPS: u32 = 192;

/// Used when an upload arrives without an `options` part.
pub const DEFAULT_FORMAT: &str = "mp3";

/// Options as submitted by the caller. Validated into a [`TranscodePlan`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TranscodeOptions {
    /// Output format: mp3, wav, aac, ogg, flac, m4a, mp4 or webm.
    pub format: String,
    pub audio_bitrate_kbps: Option<u32>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u8>,
    pub trim: Option<TrimRange>,
    /// Prepended to the download file name.
    pub filename_prefix: Option<String>,
    /// Split the output into parts of this many seconds. Audio formats only.
    pub segment_secs: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TrimRange {
    pub start_secs: f64,
    pub end_secs: f64,
}

impl TrimRange {
    pub fn duration(&self) -> f64 {
        self.end_secs - self.start_secs
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Mp3,
    Wav,
    Aac,
    Ogg,
    Flac,
    M4a,
    Mp4,
    Webm,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Mp3 => "mp3",
            OutputFormat::Wav => "wav",
            OutputFormat::Aac => "aac",
            OutputFormat::Ogg => "ogg",
            OutputFormat::Flac => "flac",
            OutputFormat::M4a => "m4a",
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Webm => "webm",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputFormat::Mp3 => "audio/mpeg",
            OutputFormat::Wav => "audio/wav",
            OutputFormat::Aac => "audio/aac",
            OutputFormat::Ogg => "audio/ogg",
            OutputFormat::Flac => "audio/flac",
            OutputFormat::M4a => "audio/mp4",
            OutputFormat::Mp4 => "video/mp4",
            OutputFormat::Webm => "video/webm",
        }
    }

    pub fn has_video(&self) -> bool {
        matches!(self, OutputFormat::Mp4 | OutputFormat::Webm)
    }

    /// Lossless and PCM outputs take no bitrate.
    pub fn accepts_bitrate(&self) -> bool {
        !matches!(self, OutputFormat::Wav | OutputFormat::Flac)
    }

    /// Container passed to `-f`, or to `-segment_format` when splitting.
    fn muxer(&self) -> &'static str {
        match self {
            OutputFormat::Mp3 => "mp3",
            OutputFormat::Wav => "wav",
            OutputFormat::Aac => "adts",
            OutputFormat::Ogg => "ogg",
            OutputFormat::Flac => "flac",
            OutputFormat::M4a => "ipod",
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Webm => "webm",
        }
    }

    fn codec_args(&self, bitrate_kbps: u32) -> Vec<String> {
        let bitrate = format!("{}k", bitrate_kbps);
        let args: Vec<&str> = match self {
            OutputFormat::Mp3 => vec!["-vn", "-c:a", "libmp3lame", "-b:a", &bitrate],
            OutputFormat::Wav => vec!["-vn", "-c:a", "pcm_s16le"],
            OutputFormat::Aac => vec!["-vn", "-c:a", "aac", "-b:a", &bitrate],
            OutputFormat::Ogg => vec!["-vn", "-c:a", "libvorbis", "-b:a", &bitrate],
            OutputFormat::Flac => vec!["-vn", "-c:a", "flac"],
            OutputFormat::M4a => vec!["-vn", "-c:a", "aac", "-b:a", &bitrate],
            OutputFormat::Mp4 => vec![
                "-c:v", "libx264", "-preset", "fast", "-c:a", "aac", "-b:a", &bitrate,
                "-movflags", "+faststart",
            ],
            OutputFormat::Webm => vec![
                "-c:v", "libvpx-vp9", "-b:v", "0", "-crf", "33", "-c:a", "libopus", "-b:a",
                &bitrate,
            ],
        };
        args.into_iter().map(str::to_string).collect()
    }
}

impl FromStr for OutputFormat {
    type Err = TranscodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mp3" => Ok(OutputFormat::Mp3),
            "wav" => Ok(OutputFormat::Wav),
            "aac" => Ok(OutputFormat::Aac),
            "ogg" => Ok(OutputFormat::Ogg),
            "flac" => Ok(OutputFormat::Flac),
            "m4a" => Ok(OutputFormat::M4a),
            "mp4" => Ok(OutputFormat::Mp4),
            "webm" => Ok(OutputFormat::Webm),
            other => Err(TranscodeError::InvalidOptions(format!(
                "unsupported output format '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Validated options. Only values from the enumerated sets survive here.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodePlan {
    pub format: OutputFormat,
    pub audio_bitrate_kbps: Option<u32>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u8>,
    pub trim: Option<TrimRange>,
    pub filename_prefix: Option<String>,
    pub segment_secs: Option<u32>,
}

impl TranscodePlan {
    pub fn from_options(options: &TranscodeOptions) -> Result<Self, TranscodeError> {
        let format: OutputFormat = options.format.parse()?;
        let invalid = |msg: String| Err(TranscodeError::InvalidOptions(msg));

        if let Some(bitrate) = options.audio_bitrate_kbps {
            if !format.accepts_bitrate() {
                return invalid(format!("format '{}' does not take a bitrate", format));
            }
            if !ALLOWED_BITRATES_KBPS.contains(&bitrate) {
                return invalid(format!("bitrate {}k is not one of {:?}", bitrate, ALLOWED_BITRATES_KBPS));
            }
        }
        if let Some(rate) = options.sample_rate {
            if !ALLOWED_SAMPLE_RATES.contains(&rate) {
                return invalid(format!("sample rate {} is not one of {:?}", rate, ALLOWED_SAMPLE_RATES));
            }
        }
        if let Some(channels) = options.channels {
            if !ALLOWED_CHANNELS.contains(&channels) {
                return invalid(format!("channel count {} is not 1 or 2", channels));
            }
        }
        if let Some(trim) = options.trim {
            let in_range = |v: f64| v.is_finite() && (0.0..=MAX_TRIM_SECS).contains(&v);
            if !in_range(trim.start_secs) || !in_range(trim.end_secs) {
                return invalid(format!("trim bounds must lie within 0..={} seconds", MAX_TRIM_SECS));
            }
            if trim.start_secs >= trim.end_secs {
                return invalid("trim start must be before trim end".to_string());
            }
        }

        if let Some(secs) = options.segment_secs {
            if format.has_video() {
                return invalid(format!("format '{}' cannot be split into parts", format));
            }
            if !ALLOWED_SEGMENT_SECS.contains(&secs) {
                return invalid(format!("segment length {}s is not one of {:?}", secs, ALLOWED_SEGMENT_SECS));
            }
        }

        let filename_prefix = match options.filename_prefix.as_deref().map(str::trim) {
            Some(prefix) if prefix.chars().count() > MAX_PREFIX_LEN => {
                return invalid(format!("filename prefix longer than {} characters", MAX_PREFIX_LEN));
            }
            Some("") | None => None,
            Some(prefix) => Some(prefix.to_string()),
        };

        Ok(Self {
            format,
            audio_bitrate_kbps: options.audio_bitrate_kbps,
            sample_rate: options.sample_rate,
            channels: options.channels,
            trim: options.trim,
            filename_prefix,
            segment_secs: options.segment_secs,
        })
    }

    /// Seconds of media the tool is expected to emit, used as the progress denominator.
    pub fn expected_duration(&self, probed_secs: Option<f64>) -> Option<f64> {
        let probed = probed_secs.filter(|d| d.is_finite() && *d > 0.0);
        match (self.trim, probed) {
            (Some(trim), Some(total)) => {
                let span = trim.end_secs.min(total) - trim.start_secs;
                (span > 0.0).then_some(span)
            }
            (Some(trim), None) => Some(trim.duration()),
            (None, total) => total,
        }
    }

    pub fn is_segmented(&self) -> bool {
        self.segment_secs.is_some()
    }

    /// Where the tool writes: one file, or a numbered pattern when splitting.
    pub fn output_target(&self, output_dir: &Path) -> PathBuf {
        let ext = self.format.extension();
        match self.segment_secs {
            Some(_) => output_dir.join(format!("{}%03d.{}", SEGMENT_PREFIX, ext)),
            None => output_dir.join(format!("output.{}", ext)),
        }
    }

    /// `ffmpeg` argument vector. No shell is involved and only plan values are interpolated.
    pub fn args(&self, input: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = ["-hide_banner", "-nostdin", "-y", "-progress", "pipe:1", "-nostats"]
            .into_iter()
            .map(OsString::from)
            .collect();

        if let Some(trim) = self.trim {
            args.push("-ss".into());
            args.push(format_seconds(trim.start_secs).into());
        }

        args.push("-i".into());
        args.push(input.as_os_str().to_owned());

        if let Some(trim) = self.trim {
            args.push("-t".into());
            args.push(format_seconds(trim.duration()).into());
        }

        let bitrate = self.audio_bitrate_kbps.unwrap_or(DEFAULT_BITRATE_KBPS);
        args.extend(self.format.codec_args(bitrate).into_iter().map(OsString::from));

        if let Some(rate) = self.sample_rate {
            args.push("-ar".into());
            args.push(rate.to_string().into());
        }
        if let Some(channels) = self.channels {
            args.push("-ac".into());
            args.push(channels.to_string().into());
        }

        match self.segment_secs {
            Some(secs) => {
                let secs = secs.to_string();
                let segment = [
                    "-f", "segment", "-segment_time", &secs,
                    "-segment_format", self.format.muxer(), "-reset_timestamps", "1",
                ];
                args.extend(segment.into_iter().map(OsString::from));
            }
            None => {
                args.push("-f".into());
                args.push(self.format.muxer().into());
            }
        }

        args.push(output.as_os_str().to_owned());
        args
    }
}

fn format_seconds(secs: f64) -> String {
    format!("{:.3}", secs)
}
