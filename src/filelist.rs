use std::collections::HashMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};

use human_repr::HumanCount;

use crate::ffmpeg::probe::{VideoDescriptor, format_duration};
use crate::job::JobState;

#[derive(Clone, Debug, PartialEq)]
pub enum FileListItemStatus {
    Invalid,
    Analyzing,
    Candidate,
    Enqueued,
    Converting,
    Converted,
    Failed,
    Cancelled,
}

impl From<JobState> for FileListItemStatus {
    fn from(state: JobState) -> Self {
        match state {
            JobState::Queued => FileListItemStatus::Enqueued,
            JobState::Running => FileListItemStatus::Converting,
            JobState::Completed => FileListItemStatus::Converted,
            JobState::Failed => FileListItemStatus::Failed,
            JobState::Cancelled => FileListItemStatus::Cancelled,
        }
    }
}

#[derive(Clone, Debug)]
pub struct FileListItem {
    pub path: PathBuf,
    pub descriptor: Option<VideoDescriptor>,
    pub destination: Option<PathBuf>,
    pub status: FileListItemStatus,
    /// Why the file is invalid or its conversion failed.
    pub message: Option<String>,
}

impl FileListItem {
    pub fn new(path: PathBuf) -> Self {
        FileListItem {
            path,
            descriptor: None,
            destination: None,
            status: FileListItemStatus::Analyzing,
            message: None,
        }
    }

    pub fn set_descriptor(&mut self, descriptor: VideoDescriptor) {
        self.descriptor = Some(descriptor);
        self.status = FileListItemStatus::Candidate;
    }

    pub fn set_invalid(&mut self, message: String) {
        self.status = FileListItemStatus::Invalid;
        self.message = Some(message);
    }

    pub fn set_enqueued(&mut self, destination: PathBuf) {
        self.destination = Some(destination);
        self.status = FileListItemStatus::Enqueued;
    }
}

impl Display for FileListItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (resolution_str, codec_str, duration_str, size_str) = match &self.descriptor {
            None => (
                String::from("---------"),
                String::from("--------"),
                String::from("--:--"),
                String::from("------ B"),
            ),
            Some(d) => (
                format!("{:<9}", d.resolution_label()),
                format!("{:<8}", d.codec),
                d.duration.map(format_duration).unwrap_or_else(|| String::from("--:--")),
                format!("{:<8}", d.file_size.human_count_bytes()),
            ),
        };

        write!(f, "{} {} {} {:>8} {} {}", self.status, resolution_str, codec_str, duration_str, size_str, self.path.display())?;
        if let Some(message) = &self.message {
            write!(f, " ({})", message)?;
        }
        Ok(())
    }
}

impl Display for FileListItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status_str = match self {
            FileListItemStatus::Invalid => "🚫",
            FileListItemStatus::Analyzing => "🔎",
            FileListItemStatus::Candidate => "☐",
            FileListItemStatus::Enqueued => "☑",
            FileListItemStatus::Converting => "🚧",
            FileListItemStatus::Converted => "✅",
            FileListItemStatus::Failed => "❌",
            FileListItemStatus::Cancelled => "⏹",
        };
        write!(f, "{}", status_str)
    }
}

/// Files in the order they were added. Adding the same path twice is a no-op.
#[derive(Debug, Default)]
pub struct FileList {
    index: HashMap<PathBuf, usize>,
    items: Vec<FileListItem>,
}

impl FileList {
    pub fn new() -> Self {
        FileList::default()
    }

    pub fn insert(&mut self, item: FileListItem) -> bool {
        if self.index.contains_key(&item.path) {
            return false;
        }
        self.index.insert(item.path.clone(), self.items.len());
        self.items.push(item);
        true
    }

    pub fn get(&self, path: &Path) -> Option<&FileListItem> {
        self.index.get(path).map(|i| &self.items[*i])
    }

    pub fn get_mut(&mut self, path: &Path) -> Option<&mut FileListItem> {
        self.index.get(path).map(|i| &mut self.items[*i])
    }

    pub fn find_destination(&self, destination: &Path) -> Option<&FileListItem> {
        self.items.iter().find(|i| i.destination.as_deref() == Some(destination))
    }

    pub fn set_status(&mut self, path: &Path, status: FileListItemStatus) {
        if let Some(item) = self.get_mut(path) {
            item.status = status;
        }
    }

    pub fn items(&self) -> &[FileListItem] {
        &self.items
    }

    pub fn candidates(&self) -> impl Iterator<Item = &FileListItem> {
        self.items.iter().filter(|i| i.status == FileListItemStatus::Candidate)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.items.clear();
    }
}
