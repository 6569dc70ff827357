//! Device programming sequencers.

pub mod config_load;
pub mod firmware;
pub mod machine;

pub use config_load::{ConfigCheck, ConfigLoadOptions, ConfigLoadReport, check_config, load_config};
pub use firmware::{FirmwareOptions, FirmwareOutcome, update_firmware};
pub use machine::{ConfigLoadStage, FirmwareStage, SequenceContext, SequenceError, Stage};
