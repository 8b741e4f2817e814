use std::fmt::Display;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, error};

use crate::error::ProbeError;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);
const AUDIO_BITRATE_KBPS: f64 = 320.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Resolution {
    pub width: u64,
    pub height: u64,
}

impl Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// What the prober learned about one input file. Never changes after creation.
#[derive(Clone, Debug, PartialEq)]
pub struct VideoDescriptor {
    pub resolution: Resolution,
    pub duration: Option<f64>,
    pub container: String,
    pub codec: String,
    pub file_size: u64,
    pub bitrate: Option<u64>,
    pub frame_rate: Option<f64>,
}

impl VideoDescriptor {
    pub fn resolution_label(&self) -> String {
        match self.resolution.height {
            h if h >= 2160 => String::from("4K"),
            h if h >= 1440 => String::from("1440p"),
            h if h >= 1080 => String::from("1080p"),
            h if h >= 720 => String::from("720p"),
            h if h >= 480 => String::from("480p"),
            h => format!("{}p", h),
        }
    }

    /// Rough size of the converted file in bytes, used for the disk space check.
    pub fn estimated_output_size(&self) -> u64 {
        let pixels = self.resolution.width.saturating_mul(self.resolution.height);
        let duration = match self.duration {
            Some(d) if d > 0.0 && pixels > 0 => d,
            _ => return (self.file_size as f64 * 1.05) as u64,
        };
        let video_kbps = match pixels {
            p if p <= 1280 * 720 => 3000.0,
            p if p <= 1920 * 1080 => 6000.0,
            p if p <= 2560 * 1440 => 12000.0,
            _ => 20000.0,
        };
        let bytes = (video_kbps + AUDIO_BITRATE_KBPS) * 1000.0 / 8.0 * duration;
        (bytes * 1.05) as u64
    }
}

pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}

#[derive(Deserialize, Debug)]
struct FFProbeJsonOutput {
    #[serde(default)]
    streams: Vec<FFProbeJsonStream>,
    format: Option<FFProbeJsonFormat>,
}

#[derive(Deserialize, Debug)]
struct FFProbeJsonStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u64>,
    height: Option<u64>,
    r_frame_rate: Option<String>,
    duration: Option<String>,
}

#[derive(Deserialize, Debug)]
struct FFProbeJsonFormat {
    format_name: Option<String>,
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
}

/// Runs ffprobe once per file with a hard timeout.
#[derive(Clone, Debug)]
pub struct Prober {
    ffprobe: PathBuf,
    timeout: Duration,
}

impl Prober {
    pub fn new(ffprobe: PathBuf) -> Self {
        Prober { ffprobe, timeout: DEFAULT_PROBE_TIMEOUT }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn probe(&self, path: &Path) -> Result<VideoDescriptor, ProbeError> {
        debug!(path = ?path, "probing");
        let mut child = Command::new(&self.ffprobe)
            .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::NotFound => ProbeError::ToolMissing,
                _ => ProbeError::Spawn { path: path.to_path_buf(), source: err },
            })?;

        let stdout = child.stdout.take().map(read_in_background);
        let stderr = child.stderr.take().map(read_in_background);

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    error!(path = ?path, timeout = ?self.timeout, "ffprobe timed out");
                    return Err(ProbeError::Timeout { path: path.to_path_buf(), timeout: self.timeout });
                },
                Ok(None) => thread::sleep(Duration::from_millis(20)),
                Err(err) => return Err(ProbeError::Spawn { path: path.to_path_buf(), source: err }),
            }
        };

        let stdout = stdout.and_then(|h| h.join().ok()).unwrap_or_default();
        let stderr = stderr.and_then(|h| h.join().ok()).unwrap_or_default();

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr).trim().to_string();
            error!(path = ?path, code = ?status.code(), stderr = %stderr, "ffprobe failed");
            return Err(ProbeError::Failed { path: path.to_path_buf(), code: status.code(), stderr });
        }

        let file_size = fs::metadata(path).map(|m| m.len()).ok();
        parse_probe_output(path, &String::from_utf8_lossy(&stdout), file_size)
    }
}

fn read_in_background<R: Read + Send + 'static>(mut reader: R) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        buf
    })
}

/// Maps ffprobe JSON into a descriptor. Optional fields that are missing or
/// unparsable become `None`; only a missing video stream fails the probe.
pub fn parse_probe_output(path: &Path, json: &str, file_size: Option<u64>) -> Result<VideoDescriptor, ProbeError> {
    let output = serde_json::from_str::<FFProbeJsonOutput>(json).map_err(|err| ProbeError::InvalidMedia {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })?;

    let video = output
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| ProbeError::NoVideoStream { path: path.to_path_buf() })?;

    let format = output.format.as_ref();
    let duration = format
        .and_then(|f| parse_number::<f64>(&f.duration))
        .or_else(|| parse_number::<f64>(&video.duration))
        .filter(|d| d.is_finite() && *d >= 0.0);

    Ok(VideoDescriptor {
        resolution: Resolution {
            width: video.width.unwrap_or(0),
            height: video.height.unwrap_or(0),
        },
        duration,
        container: format
            .and_then(|f| f.format_name.clone())
            .unwrap_or_else(|| String::from("unknown")),
        codec: video.codec_name.clone().unwrap_or_else(|| String::from("unknown")),
        file_size: format
            .and_then(|f| parse_number::<u64>(&f.size))
            .or(file_size)
            .unwrap_or(0),
        bitrate: format.and_then(|f| parse_number::<u64>(&f.bit_rate)),
        frame_rate: video.r_frame_rate.as_deref().and_then(parse_frame_rate),
    })
}

fn parse_number<T: std::str::FromStr>(value: &Option<String>) -> Option<T> {
    value.as_deref().and_then(|v| v.trim().parse().ok())
}

/// Parses rates like `30000/1001` or `25`.
pub fn parse_frame_rate(rate: &str) -> Option<f64> {
    let fps = match rate.split_once('/') {
        Some((num, denom)) => {
            let num: f64 = num.trim().parse().ok()?;
            let denom: f64 = denom.trim().parse().ok()?;
            if denom == 0.0 {
                return None;
            }
            num / denom
        },
        None => rate.trim().parse().ok()?,
    };
    if fps > 0.0 && fps.is_finite() { Some(fps) } else { None }
}
