use std::fs;
use std::path::PathBuf;

use tracing::{debug, warn};

use crate::containers::Container;
use crate::fstools::{DirEntryCategory, classify_file};

pub struct FileScanner {
    pub recursive: bool,
}

impl FileScanner {
    pub fn new(recursive: bool) -> Self {
        FileScanner { recursive, }
    }

    /// Files under `dirpath` with an accepted extension, sorted by path.
    pub fn scan(&self, dirpath: PathBuf) -> Vec<PathBuf> {
        let mut found = vec![];
        let mut dirpaths = vec![dirpath];
        while let Some(current_dir) = dirpaths.pop() {
            match fs::read_dir(&current_dir) {
                Ok(entries) => {
                    for entry in entries.filter_map(|e| e.ok()) {
                        if let Ok(ft) = entry.file_type() {
                            let p = entry.path();
                            if ft.is_file() && Container::from_path(&p).is_some() {
                                found.push(p);
                            } else if ft.is_dir() && self.recursive {
                                dirpaths.push(p);
                            }
                        }
                    }
                },
                Err(err) => warn!(dir = ?current_dir, error = %err, "unable to read directory"),
            };
        }
        found.sort();
        found
    }

    /// Directories are replaced by the video files they contain. Everything else
    /// is passed through untouched so validation can report on it.
    pub fn expand(&self, inputs: &[PathBuf]) -> Vec<PathBuf> {
        let mut paths = vec![];
        for input in inputs {
            match classify_file(input) {
                DirEntryCategory::Directory => {
                    let files = self.scan(input.clone());
                    debug!(dir = ?input, count = files.len(), "expanded directory");
                    paths.extend(files);
                },
                DirEntryCategory::SymbolicLink if input.is_dir() => paths.extend(self.scan(input.clone())),
                _ => paths.push(input.clone()),
            }
        }
        paths
    }
}
