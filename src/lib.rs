pub mod config;
pub mod domain;
pub mod error;
pub mod forecast;
pub mod ingest;
pub mod ml;
pub mod pipeline;
pub mod storage;
pub mod telemetry;

pub use config::Config;
pub use error::{Stage, StageFailed};
pub use pipeline::Pipeline;
