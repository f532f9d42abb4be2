//! amibackup-common - Shared types and utilities
//!
//! This crate holds the parts of amibackup that do not need the AWS SDK,
//! so they can be unit tested and reused without pulling it in.
//!
//! ## Modules
//!
//! - [`defaults`]: Default configuration values and known regions
//! - [`duration`]: `7d` / `36h` style duration shorthand
//! - [`status`]: Run disposition and exit codes
//! - [`tags`]: AMI tag schema for provenance and discovery

pub mod defaults;
pub mod duration;
pub mod status;
pub mod tags;

// Re-export commonly used types
pub use duration::{DurationError, parse_duration};
pub use status::Disposition;
pub use tags::Provenance;
