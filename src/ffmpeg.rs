use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, info, warn};

use crate::encoders::HwAccel;
use crate::error::ConversionError;

pub mod command;
pub mod probe;
pub mod process;
pub mod progress;

/// Locations of the two external tools.
#[derive(Clone, Debug)]
pub struct FFmpeg {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl FFmpeg {
    pub fn new(ffmpeg: PathBuf, ffprobe: PathBuf) -> Self {
        FFmpeg { ffmpeg, ffprobe }
    }

    pub fn locate() -> Result<Self, ConversionError> {
        let ffmpeg = find_tool("ffmpeg").ok_or(ConversionError::ToolMissing { program: PathBuf::from("ffmpeg") })?;
        let ffprobe = find_tool("ffprobe").ok_or(ConversionError::ToolMissing { program: PathBuf::from("ffprobe") })?;
        info!(ffmpeg = ?ffmpeg, ffprobe = ?ffprobe, "located ffmpeg tools");
        Ok(FFmpeg { ffmpeg, ffprobe })
    }

    pub fn is_installed(&self) -> bool {
        runs_successfully(&self.ffmpeg) && runs_successfully(&self.ffprobe)
    }

    /// Runs once at startup; the result applies to every job of the session.
    pub fn detect_hw_accel(&self) -> HwAccel {
        let output = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-encoders"])
            .stdin(Stdio::null())
            .output();
        match output {
            Ok(output) if output.status.success() => {
                let hw = HwAccel::from_encoder_listing(&String::from_utf8_lossy(&output.stdout));
                info!(hw_accel = %hw, "hardware encoder detection finished");
                hw
            },
            Ok(output) => {
                warn!(code = ?output.status.code(), "ffmpeg -encoders failed; using software encoding");
                HwAccel::None
            },
            Err(err) => {
                warn!(error = %err, "unable to list ffmpeg encoders; using software encoding");
                HwAccel::None
            },
        }
    }
}

fn find_tool(name: &str) -> Option<PathBuf> {
    if let Ok(path) = which::which(name) {
        return Some(path);
    }

    let common_paths: &[&str] = if cfg!(target_os = "macos") {
        &["/opt/homebrew/bin", "/usr/local/bin", "/opt/local/bin"]
    } else if cfg!(target_os = "windows") {
        &["C:\\ffmpeg\\bin", "C:\\Program Files\\ffmpeg\\bin"]
    } else {
        &["/usr/bin", "/usr/local/bin"]
    };
    let file_name = if cfg!(target_os = "windows") { format!("{}.exe", name) } else { String::from(name) };

    common_paths
        .iter()
        .map(|dir| Path::new(dir).join(&file_name))
        .find(|candidate| candidate.is_file())
}

fn runs_successfully(program: &Path) -> bool {
    let status = Command::new(program)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match status {
        Ok(status) => status.success(),
        Err(err) => {
            debug!(program = ?program, error = %err, "tool check failed");
            false
        },
    }
}
