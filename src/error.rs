use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("ffprobe was not found")]
    ToolMissing,
    #[error("unable to run ffprobe on {path:?}: {source}")]
    Spawn { path: PathBuf, source: io::Error },
    #[error("ffprobe timed out after {}s on {path:?}", timeout.as_secs())]
    Timeout { path: PathBuf, timeout: Duration },
    #[error("ffprobe exited with {code:?} on {path:?}: {stderr}")]
    Failed { path: PathBuf, code: Option<i32>, stderr: String },
    #[error("{path:?} is not a valid media container: {reason}")]
    InvalidMedia { path: PathBuf, reason: String },
    #[error("{path:?} has no video stream")]
    NoVideoStream { path: PathBuf },
}

impl ProbeError {
    pub fn user_message(&self) -> String {
        match self {
            ProbeError::ToolMissing => String::from("ffprobe is not installed. Please install FFmpeg."),
            ProbeError::Spawn { .. } | ProbeError::Failed { .. } | ProbeError::InvalidMedia { .. } =>
                String::from("The file could not be read as a video. It may be damaged or in an unsupported format."),
            ProbeError::Timeout { .. } => String::from("Analyzing the file took too long."),
            ProbeError::NoVideoStream { .. } => String::from("The file does not contain a video stream."),
        }
    }
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("{path:?} does not exist")]
    NotFound { path: PathBuf },
    #[error("{path:?} is not a regular file")]
    NotAFile { path: PathBuf },
    #[error("{path:?} has unsupported extension {extension:?}")]
    UnsupportedExtension { path: PathBuf, extension: String },
    #[error("{path:?} is not readable: {source}")]
    Unreadable { path: PathBuf, source: io::Error },
    #[error("{path:?} is empty")]
    Empty { path: PathBuf },
    #[error("{path:?} is only {size} bytes")]
    TooSmall { path: PathBuf, size: u64 },
    #[error("insufficient disk space in {dir:?}: {available} bytes available, {required} required")]
    InsufficientDiskSpace { dir: PathBuf, available: u64, required: u64 },
    #[error("output directory {dir:?} is not writable: {source}")]
    OutputDirUnwritable { dir: PathBuf, source: io::Error },
    #[error("CRF {0} is outside 0-51")]
    InvalidCrf(i64),
}

impl ValidationError {
    pub fn user_message(&self) -> String {
        match self {
            ValidationError::NotFound { .. } => String::from("File not found. It may have been moved or deleted."),
            ValidationError::NotAFile { .. } => String::from("This is not a regular file."),
            ValidationError::UnsupportedExtension { extension, .. } => format!(
                "Unsupported file format {:?}. Supported formats: {}",
                extension,
                crate::containers::ACCEPTED_EXTENSIONS.join(", ")),
            ValidationError::Unreadable { .. } => String::from("Cannot read the file. It may be locked or you may lack permission."),
            ValidationError::Empty { .. } => String::from("The file has 0 bytes and cannot be converted."),
            ValidationError::TooSmall { size, .. } => format!("The file is only {} bytes and is probably corrupted.", size),
            ValidationError::InsufficientDiskSpace { .. } => String::from("Not enough disk space for the converted file."),
            ValidationError::OutputDirUnwritable { .. } => String::from("The output folder is not writable. Choose another location."),
            ValidationError::InvalidCrf(crf) => format!("CRF must be between 0 and 51 (got {}).", crf),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("{program:?} was not found")]
    ToolMissing { program: PathBuf },
    #[error("unable to start ffmpeg: {0}")]
    Spawn(#[source] io::Error),
    #[error("ffmpeg exited with {code:?}: {}", stderr_tail.join(" | "))]
    ExitStatus { code: Option<i32>, stderr_tail: Vec<String> },
    #[error("ffmpeg produced no output for {}s", silence.as_secs())]
    Watchdog { silence: Duration },
    #[error("ffmpeg finished but {path:?} was not written")]
    MissingOutput { path: PathBuf },
    #[error("ffmpeg finished but {path:?} is empty")]
    EmptyOutput { path: PathBuf },
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ConversionError {
    pub fn user_message(&self) -> String {
        match self {
            ConversionError::ToolMissing { .. } => String::from("FFmpeg is not installed. Please install FFmpeg."),
            ConversionError::Spawn(_) => String::from("FFmpeg could not be started."),
            ConversionError::ExitStatus { stderr_tail, .. } => String::from(friendly_ffmpeg_error(&stderr_tail.join("\n"))),
            ConversionError::Watchdog { .. } => String::from("Conversion timeout. FFmpeg stopped responding."),
            ConversionError::MissingOutput { .. } | ConversionError::EmptyOutput { .. } =>
                String::from("Cannot create output file. Check that the output folder is writable and has enough space."),
            ConversionError::Io(err) => format!("Video conversion failed: {}", truncate(&err.to_string(), 200)),
        }
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("no home directory to store settings in")]
    NoHomeDir,
    #[error("settings I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("settings could not be serialized: {0}")]
    Json(#[from] serde_json::Error),
}

/// Maps common ffmpeg stderr phrases to something a user can act on.
pub fn friendly_ffmpeg_error(stderr: &str) -> &'static str {
    let s = stderr.to_lowercase();
    if s.contains("no such file or directory") {
        "File not found. The input file may have been moved or deleted during conversion."
    } else if s.contains("permission denied") {
        "Permission denied. The file may be locked by another program."
    } else if s.contains("invalid data") || s.contains("invalid argument") {
        "Invalid or corrupted video file."
    } else if s.contains("codec not found") || s.contains("unknown encoder") {
        "Required video codec not available in this FFmpeg installation."
    } else if s.contains("disk full") || s.contains("no space left") {
        "Not enough disk space."
    } else if s.contains("out of memory") || s.contains("cannot allocate memory") {
        "Out of memory."
    } else if s.contains("could not open") && s.contains("output") {
        "Cannot create output file."
    } else if s.contains("timeout") {
        "Conversion timeout."
    } else {
        "Video conversion failed. The file may be corrupted or in an incompatible format."
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}
