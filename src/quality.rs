use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::encoders::{HwAccel, VideoEncoder};
use crate::error::ValidationError;

pub const MAX_CRF: u8 = 51;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QualityProfile {
    Fast,
    Balanced,
    HighQuality,
    GPUAccelerated,
    Custom(u8),
}

/// Named presets as stored in settings and accepted on the command line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    Fast,
    Balanced,
    #[default]
    HighQuality,
    GpuAccelerated,
    Custom,
}

impl Preset {
    pub fn from_str(s: &str) -> Option<Preset> {
        match s.to_lowercase().as_str() {
            "fast" => Some(Preset::Fast),
            "balanced" => Some(Preset::Balanced),
            "high" | "high_quality" | "highquality" => Some(Preset::HighQuality),
            "gpu" | "gpu_accelerated" => Some(Preset::GpuAccelerated),
            "custom" => Some(Preset::Custom),
            _ => None,
        }
    }
}

/// Encoder flags a profile resolves to.
#[derive(Clone, Debug, PartialEq)]
pub struct EncoderParams {
    pub encoder: VideoEncoder,
    pub preset: &'static str,
    pub crf: u8,
}

impl QualityProfile {
    pub fn custom(crf: i64) -> Result<QualityProfile, ValidationError> {
        match u8::try_from(crf) {
            Ok(value) if value <= MAX_CRF => Ok(QualityProfile::Custom(value)),
            _ => Err(ValidationError::InvalidCrf(crf)),
        }
    }

    pub fn from_preset(preset: Preset, custom_crf: u8) -> Result<QualityProfile, ValidationError> {
        Ok(match preset {
            Preset::Fast => QualityProfile::Fast,
            Preset::Balanced => QualityProfile::Balanced,
            Preset::HighQuality => QualityProfile::HighQuality,
            Preset::GpuAccelerated => QualityProfile::GPUAccelerated,
            Preset::Custom => QualityProfile::custom(custom_crf as i64)?,
        })
    }

    /// Without a detected hardware encoder the GPU profile falls back to libx264
    /// with the same preset and rate value.
    pub fn parameters(&self, hw_accel: HwAccel) -> EncoderParams {
        match self {
            QualityProfile::Fast => EncoderParams { encoder: VideoEncoder::Libx264, preset: "veryfast", crf: 23 },
            QualityProfile::Balanced => EncoderParams { encoder: VideoEncoder::Libx264, preset: "fast", crf: 20 },
            QualityProfile::HighQuality => EncoderParams { encoder: VideoEncoder::Libx264, preset: "medium", crf: 17 },
            QualityProfile::GPUAccelerated => EncoderParams {
                encoder: if hw_accel.is_available() { VideoEncoder::Hardware(hw_accel) } else { VideoEncoder::Libx264 },
                preset: "fast",
                crf: 23,
            },
            QualityProfile::Custom(crf) => EncoderParams { encoder: VideoEncoder::Libx264, preset: "medium", crf: *crf },
        }
    }
}

impl Display for QualityProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QualityProfile::Fast => write!(f, "Fast"),
            QualityProfile::Balanced => write!(f, "Balanced"),
            QualityProfile::HighQuality => write!(f, "High Quality"),
            QualityProfile::GPUAccelerated => write!(f, "GPU Accelerated"),
            QualityProfile::Custom(crf) => write!(f, "Custom (CRF {})", crf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_table() {
        let fast = QualityProfile::Fast.parameters(HwAccel::None);
        assert_eq!((fast.encoder, fast.preset, fast.crf), (VideoEncoder::Libx264, "veryfast", 23));
        let balanced = QualityProfile::Balanced.parameters(HwAccel::Nvenc);
        assert_eq!((balanced.encoder, balanced.preset, balanced.crf), (VideoEncoder::Libx264, "fast", 20));
        let high = QualityProfile::HighQuality.parameters(HwAccel::None);
        assert_eq!((high.encoder, high.preset, high.crf), (VideoEncoder::Libx264, "medium", 17));
        let custom = QualityProfile::Custom(30).parameters(HwAccel::None);
        assert_eq!((custom.encoder, custom.preset, custom.crf), (VideoEncoder::Libx264, "medium", 30));
    }

    #[test]
    fn test_gpu_profile() {
        let gpu = QualityProfile::GPUAccelerated.parameters(HwAccel::Qsv);
        assert_eq!(gpu.encoder, VideoEncoder::Hardware(HwAccel::Qsv));
        assert_eq!((gpu.preset, gpu.crf), ("fast", 23));
        let fallback = QualityProfile::GPUAccelerated.parameters(HwAccel::None);
        assert_eq!(fallback.encoder, VideoEncoder::Libx264);
    }

    #[test]
    fn test_custom_crf_range() {
        assert_eq!(QualityProfile::custom(0).unwrap(), QualityProfile::Custom(0));
        assert_eq!(QualityProfile::custom(51).unwrap(), QualityProfile::Custom(51));
        assert!(matches!(QualityProfile::custom(52), Err(ValidationError::InvalidCrf(52))));
        assert!(matches!(QualityProfile::custom(-1), Err(ValidationError::InvalidCrf(-1))));
    }

    #[test]
    fn test_preset_from_str() {
        assert_eq!(Preset::from_str("HIGH"), Some(Preset::HighQuality));
        assert_eq!(Preset::from_str("gpu"), Some(Preset::GpuAccelerated));
        assert_eq!(Preset::from_str("insane"), None);
        assert_eq!(QualityProfile::from_preset(Preset::Custom, 12).unwrap(), QualityProfile::Custom(12));
    }
}
