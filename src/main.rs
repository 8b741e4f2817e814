use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use human_repr::{HumanCount, HumanDuration};
use kdam::{Bar, BarExt, term, tqdm};
use rustop::opts;
use signal_hook::consts::{SIGINT, SIGTERM};
use tracing::{error, info, warn};

use mov_convert::encoders::HwAccel;
use mov_convert::ffmpeg::FFmpeg;
use mov_convert::ffmpeg::probe::Prober;
use mov_convert::filelist::{FileList, FileListItem, FileListItemStatus};
use mov_convert::filescanner::FileScanner;
use mov_convert::fstools::{OutputPlanner, check_disk_space, prepare_output_dir, validate_input};
use mov_convert::job::{ConversionJob, JobId, JobState};
use mov_convert::logging::{LogConfig, init_logging};
use mov_convert::quality::{Preset, QualityProfile};
use mov_convert::queue_processor::{BatchSummary, QueueProcessor, QueueProcessorMessage};
use mov_convert::settings::Settings;
use mov_convert::transcoder::JobRunner;

fn main() -> ExitCode {
    let (args, _rest) = opts! {
        synopsis "Convert videos to MOV (H.264 + AAC) for video editors";
        opt quality:Option<String>, desc:"Quality profile. [fast, balanced, high, gpu, custom]";
        opt crf:Option<i64>, desc:"CRF for the custom profile (0-51).";
        opt output_dir:Option<String>, desc:"Directory for converted files.";
        opt gpu:bool=false, desc:"Use the GPU profile when a hardware encoder is available.";
        opt recursive:bool=false, desc:"Recurse into subdirectories.";
        opt save:bool=false, desc:"Remember these options as the new defaults.";
        opt dry_run:bool=false, desc:"Show what would be converted, but don't convert anything.";
        opt verbose:bool=false, desc:"Log progress details to the console.";
        param inputs:Vec<String>, desc:"Input files/directories";
    }.parse_or_exit();

    let log_config = LogConfig {
        default_level: String::from(if args.verbose { "info" } else { "warn" }),
        ..LogConfig::default()
    };
    let _log_guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Unable to initialize logging: {}", err);
            None
        },
    };

    let mut settings = Settings::load();
    if let Some(quality) = &args.quality {
        match Preset::from_str(quality) {
            Some(preset) => settings.quality = preset,
            None => {
                println!("Unknown quality profile {:?}.", quality);
                return ExitCode::FAILURE;
            },
        }
    }
    if let Some(crf) = args.crf {
        match QualityProfile::custom(crf) {
            Ok(_) => {
                settings.custom_crf = crf as u8;
                if args.quality.is_none() {
                    settings.quality = Preset::Custom;
                }
            },
            Err(err) => {
                println!("{}", err.user_message());
                return ExitCode::FAILURE;
            },
        }
    }
    if let Some(dir) = &args.output_dir {
        settings.output_directory = PathBuf::from(dir);
    }
    if args.gpu {
        settings.use_gpu = true;
    }

    let profile = match settings.profile() {
        Ok(profile) => profile,
        Err(err) => {
            println!("{}", err.user_message());
            return ExitCode::FAILURE;
        },
    };

    if args.save {
        match settings.save() {
            Ok(path) => println!("Settings saved to {}", path.display()),
            Err(err) => warn!(error = %err, "unable to save settings"),
        }
    }

    let ffmpeg = match FFmpeg::locate() {
        Ok(f) if f.is_installed() => f,
        _ => {
            println!("FFmpeg is not installed. Please install FFmpeg (with ffprobe) and try again.");
            return ExitCode::FAILURE;
        },
    };

    let hw_accel = match profile {
        QualityProfile::GPUAccelerated => {
            let hw = ffmpeg.detect_hw_accel();
            if hw == HwAccel::None {
                println!("No hardware encoder found; using software H.264.");
            }
            hw
        },
        _ => HwAccel::None,
    };

    let inputs: Vec<PathBuf> = args.inputs.iter().map(PathBuf::from).collect();
    let paths = FileScanner::new(args.recursive).expand(&inputs);
    if paths.is_empty() {
        println!("No video files found.");
        return ExitCode::FAILURE;
    }

    let filelist = analyze(&paths, &Prober::new(ffmpeg.ffprobe.clone()));

    if let Err(err) = prepare_output_dir(&settings.output_directory) {
        error!(error = %err, "output directory unusable");
        println!("{}", err.user_message());
        return ExitCode::FAILURE;
    }

    let (filelist, jobs) = plan_jobs(filelist, &settings.output_directory, profile);
    for item in filelist.items() {
        println!("{}", item);
    }
    if jobs.is_empty() {
        println!("Nothing to convert.");
        return ExitCode::FAILURE;
    }
    if args.dry_run {
        for job in &jobs {
            println!("{} -> {}", job.source.display(), job.destination.display());
        }
        return ExitCode::SUCCESS;
    }

    let runner = JobRunner::new(ffmpeg.ffmpeg.clone()).hw_accel(hw_accel);
    let mut qp = QueueProcessor::new(runner);
    let rx = qp.subscribe();
    for job in jobs {
        qp.enqueue(job);
    }

    let context = qp.context();
    for signal in [SIGINT, SIGTERM] {
        if let Err(err) = signal_hook::flag::register(signal, context.cancel_flag()) {
            warn!(signal, error = %err, "unable to install signal handler");
        }
    }

    info!(profile = %profile, hw_accel = %hw_accel, "starting conversion");
    let handle = qp.start();
    let presented = present(rx, profile);
    let summary = handle.join();
    if presented.is_none() {
        warn!("worker stopped without reporting a summary");
    }

    if summary.failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn analyze(paths: &[PathBuf], prober: &Prober) -> FileList {
    let mut filelist = FileList::new();
    for path in paths {
        if !filelist.insert(FileListItem::new(path.clone())) {
            continue;
        }
        let result = validate_input(path)
            .map_err(|err| err.user_message())
            .and_then(|_| prober.probe(path).map_err(|err| err.user_message()));
        if let Some(item) = filelist.get_mut(path) {
            match result {
                Ok(descriptor) => item.set_descriptor(descriptor),
                Err(message) => {
                    warn!(path = ?path, reason = %message, "skipping file");
                    item.set_invalid(message);
                },
            }
        }
    }
    filelist
}

fn plan_jobs(mut filelist: FileList, output_dir: &Path, profile: QualityProfile) -> (FileList, Vec<ConversionJob>) {
    let mut planner = OutputPlanner::new(output_dir.to_path_buf());
    let candidates: Vec<(PathBuf, u64, Option<f64>)> = filelist
        .candidates()
        .filter_map(|item| item.descriptor.as_ref().map(|d| (item.path.clone(), d.estimated_output_size(), d.duration)))
        .collect();

    let mut jobs = vec![];
    let mut reserved: u64 = 0;
    for (path, estimate, duration) in candidates {
        let Some(item) = filelist.get_mut(&path) else { continue };
        reserved = reserved.saturating_add(estimate);
        if let Err(err) = check_disk_space(output_dir, reserved) {
            reserved -= estimate;
            item.set_invalid(err.user_message());
            continue;
        }
        let destination = planner.plan(&path);
        item.set_enqueued(destination.clone());
        jobs.push(ConversionJob::new(path, destination, profile).total_duration(duration));
    }
    (filelist, jobs)
}

/// Draws one bar per job until the worker reports the end of the batch.
fn present(rx: std::sync::mpsc::Receiver<QueueProcessorMessage>, profile: QualityProfile) -> Option<BatchSummary> {
    term::init(false);
    let mut names: HashMap<JobId, String> = HashMap::new();
    let mut pbar: Option<Bar> = None;

    for msg in rx {
        match msg {
            QueueProcessorMessage::BatchStart(count) => {
                println!("Converting {} file(s) with the {} profile. Press Ctrl-C to cancel.", count, profile);
            },
            QueueProcessorMessage::JobStart(job) => {
                let name = job.source.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
                let total = if job.total_duration.is_some_and(|d| d > 0.0) { 100 } else { 0 };
                pbar = Some(tqdm!(
                    total = total,
                    desc = name.clone(),
                    unit = String::from(if total == 100 { "%" } else { "s" }),
                    position = 0,
                    force_refresh = true
                ));
                names.insert(job.id, name);
            },
            QueueProcessorMessage::Progress(_, snapshot) => {
                if let Some(bar) = pbar.as_mut() {
                    let position = match snapshot.percent {
                        Some(percent) => percent as usize,
                        None => snapshot.elapsed_seconds as usize,
                    };
                    let mut postfix = vec![snapshot.elapsed_seconds.human_duration().to_string()];
                    if let Some(size) = snapshot.total_size {
                        postfix.push(size.human_count_bytes().to_string());
                    }
                    if let Some(speed) = snapshot.speed {
                        postfix.push(format!("{:.2}x", speed));
                    }
                    bar.set_postfix(postfix.join(" "));
                    let _ = bar.update_to(position);
                }
            },
            QueueProcessorMessage::JobEnd(id, state, message) => {
                if let Some(mut bar) = pbar.take() {
                    let _ = bar.refresh();
                    eprintln!();
                }
                let name = names.get(&id).cloned().unwrap_or_default();
                let status = FileListItemStatus::from(state);
                match (state, message) {
                    (JobState::Failed, Some(message)) => println!("{} {} ({})", status, name, message),
                    _ => println!("{} {}", status, name),
                }
            },
            QueueProcessorMessage::BatchEnd(summary) => {
                println!(
                    "Done: {} converted, {} failed, {} cancelled, {} written.",
                    summary.completed,
                    summary.failed,
                    summary.cancelled,
                    summary.bytes_written.human_count_bytes());
                return Some(summary);
            },
        }
    }
    None
}
