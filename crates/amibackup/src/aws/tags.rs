//! Conversions between amibackup tag pairs and EC2 SDK tags
//!
//! The tag schema itself lives in [`amibackup_common::tags`]; this module
//! only adapts it to the SDK types.

use aws_sdk_ec2::types::{Filter, Tag};

pub use amibackup_common::tags::*;

/// Build SDK tags from key/value pairs.
pub fn to_ec2_tags(pairs: &[(String, String)]) -> Vec<Tag> {
    pairs
        .iter()
        .map(|(k, v)| Tag::builder().key(k).value(v).build())
        .collect()
}

/// Collect SDK tags into key/value pairs, dropping tags without a key.
pub fn from_ec2_tags(tags: &[Tag]) -> Vec<(String, String)> {
    tags.iter()
        .filter_map(|t| {
            let key = t.key()?;
            Some((key.to_string(), t.value().unwrap_or_default().to_string()))
        })
        .collect()
}

/// Look up a tag value by key.
pub fn tag_value<'a>(tags: &'a [(String, String)], key: &str) -> Option<&'a str> {
    tags.iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// Filter matching resources whose tag `key` equals `value`.
pub fn tag_filter(key: &str, value: &str) -> Filter {
    Filter::builder()
        .name(format!("tag:{}", key))
        .values(value)
        .build()
}
