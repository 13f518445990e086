//! docscan: acquisition pipeline for SCSI sheet-fed document scanners.

pub mod codes;
pub mod config;
pub mod error;
pub mod job;
pub mod models;
pub mod producer;
pub mod protocol;
pub mod readlist;
pub mod reshape;
pub mod ring;
pub mod scanner;
pub mod sense;
pub mod setup;
pub mod transport;

pub use config::PipelineConfig;
pub use error::ScanError;
pub use job::{ColorMode, ScanConfig};
pub use models::{MODELS, ModelProfile, detect_model, find_model};
pub use readlist::{FrameFormat, ItemShape};
pub use scanner::{ReadStatus, Scanner};
pub use sense::DeviceOutcome;
pub use transport::sim::SimulatedScanner;
