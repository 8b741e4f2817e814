use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Hardware video encoder families, resolved once at startup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HwAccel {
    #[default]
    None,
    Nvenc,
    Qsv,
    Vaapi,
}

/// Detection order. When several vendors are present the first one listed wins.
const DETECTION_ORDER: [HwAccel; 3] = [HwAccel::Nvenc, HwAccel::Qsv, HwAccel::Vaapi];

impl HwAccel {
    /// Picks an encoder from the output of `ffmpeg -encoders`.
    pub fn from_encoder_listing(listing: &str) -> HwAccel {
        let available: Vec<&str> = listing
            .lines()
            .filter_map(|line| line.split_whitespace().nth(1))
            .collect();
        DETECTION_ORDER
            .into_iter()
            .find(|hw| match hw.encoder() {
                Some(name) => available.contains(&name),
                None => false,
            })
            .unwrap_or(HwAccel::None)
    }

    pub fn encoder(&self) -> Option<&'static str> {
        match self {
            HwAccel::None => None,
            HwAccel::Nvenc => Some("h264_nvenc"),
            HwAccel::Qsv => Some("h264_qsv"),
            HwAccel::Vaapi => Some("h264_vaapi"),
        }
    }

    pub fn is_available(&self) -> bool {
        *self != HwAccel::None
    }
}

impl Display for HwAccel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HwAccel::None => write!(f, "software"),
            HwAccel::Nvenc => write!(f, "NVIDIA NVENC"),
            HwAccel::Qsv => write!(f, "Intel Quick Sync"),
            HwAccel::Vaapi => write!(f, "VAAPI"),
        }
    }
}

/// The encoder actually placed on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VideoEncoder {
    Libx264,
    Hardware(HwAccel),
}

impl VideoEncoder {
    pub fn cv_parameter(&self) -> &'static str {
        match self {
            VideoEncoder::Libx264 => "libx264",
            VideoEncoder::Hardware(hw) => hw.encoder().unwrap_or("libx264"),
        }
    }
}
