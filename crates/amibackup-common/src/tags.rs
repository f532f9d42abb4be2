//! AMI tag schema written and read by amibackup
//!
//! Backup images are identified and aged purely through their tags, so the
//! keys below are a compatibility surface: images written by older releases
//! carry exactly these keys and must keep being recognised.
//!
//! ## Tag Schema
//!
//! | Tag Key | Description |
//! |---------|-------------|
//! | `hostname` | Instance name tag the backup was taken for (identity tag) |
//! | `instance` | Source EC2 instance ID |
//! | `date` | Human readable creation time |
//! | `timestamp` | Creation time in integer seconds since the UNIX epoch |
//! | `sourceregion` | Region of the original AMI (copies only) |
//! | `amibackup:tool` | Static identifier ("amibackup") |

use chrono::{DateTime, Utc};

/// Identity tag: the instance name the image belongs to
pub const TAG_HOSTNAME: &str = "hostname";

/// Source instance ID
pub const TAG_INSTANCE: &str = "instance";

/// Human readable creation date
pub const TAG_DATE: &str = "date";

/// Authoritative backup timestamp (integer seconds)
pub const TAG_TIMESTAMP: &str = "timestamp";

/// Region the copied image was replicated from
pub const TAG_SOURCE_REGION: &str = "sourceregion";

/// Tag key for tool identification
pub const TAG_TOOL: &str = "amibackup:tool";

/// Tag value for tool identification
pub const TAG_TOOL_VALUE: &str = "amibackup";

/// EC2 instance name tag used to select backup targets
pub const TAG_NAME: &str = "Name";

/// Format used for the `date` tag and image descriptions
const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

/// Format used inside generated AMI names (no spaces or colons)
const NAME_STAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Helper to format the backup timestamp tag
pub fn format_timestamp(time: DateTime<Utc>) -> String {
    time.timestamp().to_string()
}

/// Helper to parse the backup timestamp tag.
///
/// Returns `None` for anything that is not an integer number of seconds.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    s.parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

/// Helper to format the human readable `date` tag
pub fn format_date(time: DateTime<Utc>) -> String {
    time.format(DATE_FORMAT).to_string()
}

/// Helper to format the timestamp fragment of generated AMI names
pub fn format_name_stamp(time: DateTime<Utc>) -> String {
    time.format(NAME_STAMP_FORMAT).to_string()
}

/// Provenance recorded on every image amibackup creates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    /// Instance name tag value (written as `hostname`)
    pub hostname: String,
    /// Source instance ID
    pub instance_id: String,
    /// Backup time shared by the original and its copy
    pub taken_at: DateTime<Utc>,
    /// Region the image was copied from, set on copies only
    pub source_region: Option<String>,
}

impl Provenance {
    /// Provenance for an image created directly from an instance
    pub fn new(
        hostname: impl Into<String>,
        instance_id: impl Into<String>,
        taken_at: DateTime<Utc>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            instance_id: instance_id.into(),
            taken_at,
            source_region: None,
        }
    }

    /// Same provenance, marked as copied out of `region`
    pub fn copied_from(&self, region: impl Into<String>) -> Self {
        Self {
            source_region: Some(region.into()),
            ..self.clone()
        }
    }

    /// Render as an ordered list of tag key/value pairs
    pub fn to_tags(&self) -> Vec<(String, String)> {
        let mut tags = vec![
            (TAG_HOSTNAME.to_string(), self.hostname.clone()),
            (TAG_INSTANCE.to_string(), self.instance_id.clone()),
            (TAG_DATE.to_string(), format_date(self.taken_at)),
            (TAG_TIMESTAMP.to_string(), format_timestamp(self.taken_at)),
            (TAG_TOOL.to_string(), TAG_TOOL_VALUE.to_string()),
        ];
        if let Some(region) = &self.source_region {
            tags.push((TAG_SOURCE_REGION.to_string(), region.clone()));
        }
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_parse_roundtrip() {
        let now = Utc::now();
        let parsed = parse_timestamp(&format_timestamp(now)).unwrap();
        assert_eq!(parsed.timestamp(), now.timestamp());
    }

    #[test]
    fn test_parse_invalid() {
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("1400000000.5").is_none());
        assert!(parse_timestamp(" 1400000000").is_none());
    }

    #[test]
    fn test_name_stamp_has_no_spaces() {
        let t = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(format_name_stamp(t), "2024-03-09_07-05-01");
        assert_eq!(format_date(t), "2024-03-09 07:05:01 +0000");
    }

    #[test]
    fn test_provenance_tags() {
        let t = Utc.with_ymd_and_hms(2024, 3, 9, 0, 0, 0).unwrap();
        let p = Provenance::new("web", "i-0abc", t);
        let tags = p.to_tags();
        assert!(tags.contains(&(TAG_HOSTNAME.to_string(), "web".to_string())));
        assert!(tags.contains(&(TAG_TIMESTAMP.to_string(), t.timestamp().to_string())));
        assert!(!tags.iter().any(|(k, _)| k == TAG_SOURCE_REGION));

        let copied = p.copied_from("us-east-1").to_tags();
        assert!(copied.contains(&(TAG_SOURCE_REGION.to_string(), "us-east-1".to_string())));
        assert_eq!(copied.len(), tags.len() + 1);
    }
}
