//! RollCall: self-verifying manifests ("rolls") for batches of files, and
//! the checks that reconcile them against what actually arrived.

pub mod builder;
pub mod digest;
pub mod error;
pub mod hex;
pub mod parser;
pub mod path_safety;
pub mod progress;
pub mod record;
pub mod roll;
pub mod select;
pub mod transfer;
pub mod verify;

pub use error::{Result, RollError};
pub use record::FileRecord;
pub use roll::{FormatVersion, Roll};
