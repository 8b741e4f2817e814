use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{SettingsError, ValidationError};
use crate::quality::{Preset, QualityProfile};

pub const SETTINGS_DIR: &str = ".video-converter";
const SETTINGS_FILE: &str = "settings.json";
const DEFAULT_CUSTOM_CRF: u8 = 18;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

/// User preferences kept between runs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub quality: Preset,
    pub custom_crf: u8,
    pub output_directory: PathBuf,
    pub theme: Theme,
    pub use_gpu: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            quality: Preset::default(),
            custom_crf: DEFAULT_CUSTOM_CRF,
            output_directory: default_output_directory(),
            theme: Theme::default(),
            use_gpu: false,
        }
    }
}

fn default_output_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Videos")
        .join("Converted")
}

/// `~/.video-converter`, also home to the log directory.
pub fn config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(SETTINGS_DIR))
}

impl Settings {
    pub fn settings_path() -> Option<PathBuf> {
        config_dir().map(|dir| dir.join(SETTINGS_FILE))
    }

    pub fn load() -> Self {
        match Self::settings_path() {
            Some(path) => Self::load_from_file(&path),
            None => Self::default(),
        }
    }

    /// A missing or unreadable file yields defaults.
    pub fn load_from_file(path: &Path) -> Self {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) => {
                debug!(path = ?path, error = %err, "no saved settings; using defaults");
                return Self::default();
            },
        };
        match serde_json::from_str(&contents) {
            Ok(settings) => settings,
            Err(err) => {
                warn!(path = ?path, error = %err, "settings file is invalid; using defaults");
                Self::default()
            },
        }
    }

    pub fn save(&self) -> Result<PathBuf, SettingsError> {
        let path = Self::settings_path().ok_or(SettingsError::NoHomeDir)?;
        self.save_to_file(&path)?;
        Ok(path)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// `use_gpu` selects the GPU profile whatever the stored preset is.
    pub fn profile(&self) -> Result<QualityProfile, ValidationError> {
        if self.use_gpu {
            return Ok(QualityProfile::GPUAccelerated);
        }
        QualityProfile::from_preset(self.quality, self.custom_crf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(SETTINGS_FILE);
        let settings = Settings {
            quality: Preset::Custom,
            custom_crf: 28,
            output_directory: PathBuf::from("/tmp/out"),
            theme: Theme::Dark,
            use_gpu: false,
        };
        settings.save_to_file(&path).unwrap();
        assert_eq!(Settings::load_from_file(&path), settings);
        assert_eq!(settings.profile().unwrap(), QualityProfile::Custom(28));

        let json = fs::read_to_string(&path).unwrap();
        assert!(json.contains("\"quality\": \"custom\""));
        assert!(json.contains("\"theme\": \"dark\""));
    }

    #[test]
    fn test_missing_and_invalid_files_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Settings::load_from_file(&dir.path().join("missing.json")), Settings::default());

        let bad = dir.path().join("bad.json");
        fs::write(&bad, "{ not json").unwrap();
        assert_eq!(Settings::load_from_file(&bad), Settings::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        fs::write(&path, r#"{"quality": "fast"}"#).unwrap();
        let settings = Settings::load_from_file(&path);
        assert_eq!(settings.quality, Preset::Fast);
        assert_eq!(settings.custom_crf, 18);
        assert_eq!(settings.profile().unwrap(), QualityProfile::Fast);
    }

    #[test]
    fn test_use_gpu_overrides_preset() {
        let settings = Settings { quality: Preset::Fast, use_gpu: true, ..Settings::default() };
        assert_eq!(settings.profile().unwrap(), QualityProfile::GPUAccelerated);
    }

    #[test]
    fn test_out_of_range_crf() {
        let settings = Settings { quality: Preset::Custom, custom_crf: 60, ..Settings::default() };
        assert!(matches!(settings.profile(), Err(ValidationError::InvalidCrf(60))));
    }
}
