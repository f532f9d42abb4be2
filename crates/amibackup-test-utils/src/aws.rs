//! AWS test utilities
//!
//! Provides region and target detection for live integration tests.

use chrono::Utc;

/// Get the source AWS region for tests.
///
/// Checks environment variables in order:
/// 1. AWS_REGION
/// 2. AWS_DEFAULT_REGION
/// 3. Falls back to us-east-2
///
/// # Example
///
/// ```
/// use amibackup_test_utils::aws::get_test_region;
///
/// let region = get_test_region();
/// assert!(!region.is_empty());
/// ```
pub fn get_test_region() -> String {
    std::env::var("AWS_REGION")
        .or_else(|_| std::env::var("AWS_DEFAULT_REGION"))
        .unwrap_or_else(|_| "us-east-2".to_string())
}

/// Get the destination region for cross-region copy tests.
///
/// Uses `AMIBACKUP_TEST_DEST_REGION`, falling back to us-west-2.
pub fn get_test_dest_region() -> String {
    std::env::var("AMIBACKUP_TEST_DEST_REGION").unwrap_or_else(|_| "us-west-2".to_string())
}

/// Name tag of a disposable instance the live tests may image.
///
/// Live backup tests are skipped unless `AMIBACKUP_TEST_INSTANCE` is set,
/// because they create (and then deregister) real AMIs.
pub fn get_test_instance_name() -> Option<String> {
    std::env::var("AMIBACKUP_TEST_INSTANCE")
        .ok()
        .filter(|name| !name.trim().is_empty())
}

/// Generate a unique run ID for test resources.
///
/// Format: `amibackup-test-{timestamp_ms}-{counter}`.
pub fn test_run_id() -> String {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);

    let ts = Utc::now().timestamp_millis();
    let counter = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("amibackup-test-{}-{}", ts, counter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_id_format() {
        let run_id = test_run_id();
        let rest = run_id.strip_prefix("amibackup-test-").unwrap();
        let parts: Vec<&str> = rest.split('-').collect();
        assert_eq!(parts.len(), 2);
        parts[0].parse::<i64>().expect("Should be valid timestamp");
        parts[1].parse::<u32>().expect("Should be valid counter");
    }

    #[test]
    fn test_run_id_unique() {
        let id1 = test_run_id();
        let id2 = test_run_id();
        assert_ne!(id1, id2);
    }
}
