pub mod config;
pub mod dsp;
pub mod error;
pub mod io;
pub mod metrics;
pub mod pipeline;
pub mod signal;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use signal::*;
