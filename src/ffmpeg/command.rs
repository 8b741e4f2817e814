use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::containers::Container;
use crate::encoders::{HwAccel, VideoEncoder};
use crate::quality::QualityProfile;

const VAAPI_DEVICE: &str = "/dev/dri/renderD128";

/// Builds the encoder argument list. Every path and option is its own element;
/// nothing is ever joined into a shell string.
pub fn build_command(source: &Path, destination: &Path, profile: QualityProfile, hw_accel: HwAccel) -> Vec<OsString> {
    fn os(s: &str) -> OsString { OsString::from(s) }

    let params = profile.parameters(hw_accel);
    let mut args = vec![os("-hide_banner"), os("-loglevel"), os("warning"), os("-y")];

    if params.encoder == VideoEncoder::Hardware(HwAccel::Vaapi) {
        args.push(os("-vaapi_device"));
        args.push(os(VAAPI_DEVICE));
    }

    args.push(os("-i"));
    args.push(path_argument(source));

    args.push(os("-c:v"));
    args.push(os(params.encoder.cv_parameter()));

    let crf = params.crf.to_string();
    match params.encoder {
        VideoEncoder::Libx264 => {
            args.extend([os("-preset"), os(params.preset), os("-crf"), os(&crf)]);
            args.extend([os("-pix_fmt"), os("yuv420p")]);
        },
        VideoEncoder::Hardware(HwAccel::Nvenc) => {
            args.extend([os("-preset"), os(params.preset), os("-rc"), os("vbr"), os("-cq"), os(&crf)]);
            args.extend([os("-pix_fmt"), os("yuv420p")]);
        },
        VideoEncoder::Hardware(HwAccel::Qsv) => {
            args.extend([os("-preset"), os(params.preset), os("-global_quality"), os(&crf)]);
            args.extend([os("-pix_fmt"), os("nv12")]);
        },
        VideoEncoder::Hardware(HwAccel::Vaapi) => {
            // vaapi has no preset names; frames are uploaded as 8-bit 4:2:0
            args.extend([os("-vf"), os("format=nv12,hwupload"), os("-qp"), os(&crf)]);
        },
        VideoEncoder::Hardware(HwAccel::None) => {
            args.extend([os("-preset"), os(params.preset), os("-crf"), os(&crf)]);
            args.extend([os("-pix_fmt"), os("yuv420p")]);
        },
    }

    args.extend([os("-c:a"), os("aac"), os("-b:a"), os("320k")]);
    args.extend(Container::output_parameters(Container::QuickTime).into_iter().map(OsString::from));

    args.push(path_argument(destination));
    args
}

/// Arguments asking the encoder to report machine-readable progress on stdout.
pub fn progress_arguments() -> Vec<OsString> {
    vec![OsString::from("-progress"), OsString::from("pipe:1"), OsString::from("-nostats")]
}

/// Relative paths starting with '-' would otherwise be read as options.
fn path_argument(path: &Path) -> OsString {
    if path.as_os_str().to_string_lossy().starts_with('-') {
        PathBuf::from(".").join(path).into_os_string()
    } else {
        path.as_os_str().to_os_string()
    }
}
