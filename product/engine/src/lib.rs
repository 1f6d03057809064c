pub mod cmd;
pub mod config;
mod error;
pub mod ffmpeg;
pub mod history;
pub mod lines;
pub mod models;
pub mod paths;
pub mod supervisor;
pub mod tools;
pub mod ytdlp;

pub use error::{EngineError, Result};
