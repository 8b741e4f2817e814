pub mod containers;
pub mod encoders;
pub mod error;
pub mod ffmpeg;
pub mod filelist;
pub mod filescanner;
pub mod fstools;
pub mod job;
pub mod logging;
pub mod quality;
pub mod queue_processor;
pub mod settings;
pub mod transcoder;
