mod error;
pub mod ffmpeg;
pub mod jobs;
pub mod models;
pub mod paths;
pub mod quality;
pub mod runner;
pub mod video_url;
pub mod ytdlp;

pub use error::{EngineError, Result};
