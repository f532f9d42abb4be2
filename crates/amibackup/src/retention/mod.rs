//! Tiered retention policy
//!
//! - [`window`]: `INTERVAL:START:END` parsing into absolute windows
//! - [`evaluator`]: selection of the images a set of windows purges

pub mod evaluator;
pub mod window;

pub use evaluator::{BucketDecision, PurgePlan, evaluate};
pub use window::{RetentionWindow, WindowError, parse_window, parse_windows};
