//! Overall run disposition and its process exit code
//!
//! The values double as monitoring-plugin states, so they must stay stable:
//! - `Ok = 0`: every phase succeeded
//! - `Warning = 1`: the run finished but some instance or purge item failed
//! - `Critical = 2`: configuration error, aborting API error or global timeout

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    serde::Serialize,
    strum::Display,
    strum::EnumString,
    strum::FromRepr,
    strum::AsRefStr,
)]
#[strum(ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Disposition {
    #[default]
    #[strum(serialize = "OK")]
    Ok = 0,
    #[strum(serialize = "WARNING")]
    Warning = 1,
    #[strum(serialize = "CRITICAL")]
    Critical = 2,
}

impl Disposition {
    /// Process exit code for this disposition
    pub fn exit_code(self) -> u8 {
        self as u8
    }

    /// The more severe of two dispositions
    pub fn escalate(self, other: Self) -> Self {
        self.max(other)
    }
}
