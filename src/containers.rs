use std::fmt::Display;
use std::path::Path;

pub const ACCEPTED_EXTENSIONS: [&str; 5] = ["mp4", "mov", "avi", "mkv", "webm"];

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Container {
    MP4,
    QuickTime,
    AVI,
    Matroska,
    WebM,
}

impl Display for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Container::MP4 => write!(f, "mp4"),
            Container::QuickTime => write!(f, "mov"),
            Container::AVI => write!(f, "avi"),
            Container::Matroska => write!(f, "matroska"),
            Container::WebM => write!(f, "webm"),
        }
    }
}

impl Container {
    /// Extension check only; the prober decides whether the file is really video.
    pub fn from_path(path: &Path) -> Option<Container> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "mp4" => Some(Container::MP4),
            "mov" => Some(Container::QuickTime),
            "avi" => Some(Container::AVI),
            "mkv" => Some(Container::Matroska),
            "webm" => Some(Container::WebM),
            _ => None,
        }
    }

    pub fn extension(container: Container) -> &'static str {
        match container {
            Container::MP4 => "mp4",
            Container::QuickTime => "mov",
            Container::AVI => "avi",
            Container::Matroska => "mkv",
            Container::WebM => "webm",
        }
    }

    /// Output muxer flags. Only QuickTime is ever written.
    pub fn output_parameters(container: Container) -> Vec<String> {
        match container {
            Container::QuickTime | Container::MP4 => vec![
                String::from("-movflags"),
                String::from("+faststart"),
                String::from("-f"),
                container.to_string(),
            ],
            _ => vec![
                String::from("-f"),
                container.to_string(),
            ],
        }
    }
}
