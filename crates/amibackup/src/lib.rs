//! amibackup - cross-region EC2 AMI backups with tiered retention
//!
//! This crate provides the `amibackup` binary and the library behind it:
//! image creation and cross-region replication under a global deadline, and
//! pruning of old backups according to `INTERVAL:START:END` retention windows.

pub mod aws;
pub mod catalog;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod purge;
pub mod report;
pub mod retention;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod wait;
