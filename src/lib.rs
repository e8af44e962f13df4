pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod resources;
pub mod schedule;
pub mod storage;
pub mod types;
pub mod workbook;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use pipeline::{inspect, run_once, Inspection, RunReport};
