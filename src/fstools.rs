use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::containers::Container;
use crate::error::ValidationError;

/// Anything smaller is almost certainly truncated.
pub const MIN_INPUT_SIZE: u64 = 1024;

const WRITE_TEST_FILE: &str = ".mov-convert-write-test";

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DirEntryCategory {
    DoesNotExist,
    RegularFile,
    SymbolicLink,
    Directory,
    Unknown,
}

pub fn classify_file(path: &Path) -> DirEntryCategory {
    match fs::symlink_metadata(path) {
        Ok(metadata) => {
            if metadata.is_symlink() {
                DirEntryCategory::SymbolicLink
            } else if metadata.is_file() {
                DirEntryCategory::RegularFile
            } else if metadata.is_dir() {
                DirEntryCategory::Directory
            } else {
                DirEntryCategory::Unknown
            }
        },
        Err(_) => DirEntryCategory::DoesNotExist,
    }
}

/// Checks a candidate input before it is probed. Returns its size in bytes.
pub fn validate_input(path: &Path) -> Result<u64, ValidationError> {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(ValidationError::NotFound { path: path.to_path_buf() });
        },
        Err(err) => return Err(ValidationError::Unreadable { path: path.to_path_buf(), source: err }),
    };
    if !metadata.is_file() {
        return Err(ValidationError::NotAFile { path: path.to_path_buf() });
    }

    if Container::from_path(path).is_none() {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        return Err(ValidationError::UnsupportedExtension { path: path.to_path_buf(), extension });
    }

    let mut byte = [0u8; 1];
    File::open(path)
        .and_then(|mut f| f.read(&mut byte))
        .map_err(|err| ValidationError::Unreadable { path: path.to_path_buf(), source: err })?;

    match metadata.len() {
        0 => Err(ValidationError::Empty { path: path.to_path_buf() }),
        size if size < MIN_INPUT_SIZE => Err(ValidationError::TooSmall { path: path.to_path_buf(), size }),
        size => Ok(size),
    }
}

/// Creates the output directory if needed and proves it can be written to.
pub fn prepare_output_dir(dir: &Path) -> Result<(), ValidationError> {
    let unwritable = |source| ValidationError::OutputDirUnwritable { dir: dir.to_path_buf(), source };
    fs::create_dir_all(dir).map_err(unwritable)?;
    let probe = dir.join(WRITE_TEST_FILE);
    fs::write(&probe, b"").map_err(unwritable)?;
    if let Err(err) = fs::remove_file(&probe) {
        warn!(path = ?probe, error = %err, "unable to remove write test file");
    }
    Ok(())
}

#[cfg(unix)]
pub fn available_space(dir: &Path) -> Option<u64> {
    match nix::sys::statvfs::statvfs(dir) {
        Ok(stat) => Some(stat.blocks_available() as u64 * stat.fragment_size() as u64),
        Err(err) => {
            debug!(dir = ?dir, error = %err, "statvfs failed");
            None
        },
    }
}

#[cfg(not(unix))]
pub fn available_space(_dir: &Path) -> Option<u64> {
    None
}

/// Requires 110% of the estimate to be free. Passes when free space is unknown.
pub fn check_disk_space(dir: &Path, estimated_size: u64) -> Result<(), ValidationError> {
    let required = estimated_size.saturating_add(estimated_size / 10);
    match available_space(dir) {
        Some(available) if available < required => Err(ValidationError::InsufficientDiskSpace {
            dir: dir.to_path_buf(),
            available,
            required,
        }),
        _ => Ok(()),
    }
}

/// Hands out `.mov` destinations in one directory, never reusing a path that
/// exists on disk or was already given to an earlier file of the batch.
#[derive(Debug)]
pub struct OutputPlanner {
    dir: PathBuf,
    reserved: HashSet<PathBuf>,
}

impl OutputPlanner {
    pub fn new(dir: PathBuf) -> Self {
        OutputPlanner { dir, reserved: HashSet::new() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn plan(&mut self, source: &Path) -> PathBuf {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| String::from("output"));
        let extension = Container::extension(Container::QuickTime);

        let mut candidate = self.dir.join(format!("{}.{}", stem, extension));
        let mut counter = 1;
        while candidate.exists() || self.reserved.contains(&candidate) {
            candidate = self.dir.join(format!("{}_{}.{}", stem, counter, extension));
            counter += 1;
        }
        self.reserved.insert(candidate.clone());
        candidate
    }

    /// Gives a path back, e.g. when its job was dropped before running.
    pub fn release(&mut self, path: &Path) {
        self.reserved.remove(path);
    }
}
