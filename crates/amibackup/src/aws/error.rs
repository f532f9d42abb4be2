//! AWS error classification and handling
//!
//! Provides typed errors for AWS SDK operations using the `.code()` method
//! instead of string matching on Debug format.

use aws_sdk_ec2::error::{ProvideErrorMetadata, SdkError};
use thiserror::Error;

/// AWS error categories for retry and purge logic
#[derive(Debug, Clone, Error)]
pub enum AwsError {
    /// Resource was not found (already deleted, safe to skip during purge)
    #[error("Resource not found: {resource_type} '{resource_id}'")]
    NotFound {
        resource_type: &'static str,
        resource_id: String,
    },

    /// Rate limit exceeded (retryable with backoff)
    #[error("Rate limit exceeded")]
    Throttled,

    /// Snapshot is still referenced by a registered image
    #[error("Resource is still in use: {message}")]
    InUse { message: String },

    /// Credentials were rejected or lack the required permission
    #[error("Not authorized: {message}")]
    Unauthorized { message: String },

    /// Generic AWS SDK error with code and message
    #[error("AWS error: {message}")]
    Sdk {
        code: Option<String>,
        message: String,
    },
}

impl AwsError {
    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, AwsError::NotFound { .. })
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        matches!(self, AwsError::Throttled)
    }
}

/// Known AWS error codes for "not found" conditions
const NOT_FOUND_CODES: &[&str] = &[
    "InvalidAMIID.NotFound",
    "InvalidAMIID.Unavailable",
    "InvalidSnapshot.NotFound",
    "InvalidInstanceID.NotFound",
];

/// Known AWS error codes for throttling/rate limiting
const THROTTLING_CODES: &[&str] = &["Throttling", "ThrottlingException", "RequestLimitExceeded"];

/// Known AWS error codes for resources that are still referenced
const IN_USE_CODES: &[&str] = &["InvalidSnapshot.InUse"];

/// Known AWS error codes for rejected credentials or permissions
const UNAUTHORIZED_CODES: &[&str] = &["UnauthorizedOperation", "AuthFailure"];

fn resource_type_for(code: &str) -> &'static str {
    if code.starts_with("InvalidAMIID") {
        "image"
    } else if code.starts_with("InvalidSnapshot") {
        "snapshot"
    } else if code.starts_with("InvalidInstanceID") {
        "instance"
    } else {
        "resource"
    }
}

/// Classify an AWS SDK error using the error code.
pub fn classify_aws_error(code: Option<&str>, message: Option<&str>) -> AwsError {
    let message = message.unwrap_or("Unknown error").to_string();

    match code {
        Some(c) if NOT_FOUND_CODES.contains(&c) => AwsError::NotFound {
            resource_type: resource_type_for(c),
            resource_id: message,
        },
        Some(c) if THROTTLING_CODES.contains(&c) => AwsError::Throttled,
        Some(c) if IN_USE_CODES.contains(&c) => AwsError::InUse { message },
        Some(c) if UNAUTHORIZED_CODES.contains(&c) => AwsError::Unauthorized { message },
        _ => AwsError::Sdk {
            code: code.map(|s| s.to_string()),
            message,
        },
    }
}

fn classify_sdk_error<E>(cause: &(dyn std::error::Error + 'static)) -> Option<AwsError>
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    cause.downcast_ref::<SdkError<E>>().map(|e| {
        let meta = ProvideErrorMetadata::meta(e);
        classify_aws_error(meta.code(), meta.message())
    })
}

/// Classify an error from an anyhow::Error by extracting the AWS error code.
///
/// Walks the error chain looking for the EC2 operation errors amibackup
/// issues. Falls back to string matching on the Debug representation if no
/// typed error is found.
pub fn classify_anyhow_error(error: &anyhow::Error) -> AwsError {
    use aws_sdk_ec2::operation::{
        copy_image::CopyImageError, create_image::CreateImageError,
        create_tags::CreateTagsError, delete_snapshot::DeleteSnapshotError,
        deregister_image::DeregisterImageError, describe_images::DescribeImagesError,
        describe_instances::DescribeInstancesError, describe_snapshots::DescribeSnapshotsError,
    };

    for cause in error.chain() {
        let classified = classify_sdk_error::<CreateImageError>(cause)
            .or_else(|| classify_sdk_error::<CopyImageError>(cause))
            .or_else(|| classify_sdk_error::<CreateTagsError>(cause))
            .or_else(|| classify_sdk_error::<DescribeImagesError>(cause))
            .or_else(|| classify_sdk_error::<DeregisterImageError>(cause))
            .or_else(|| classify_sdk_error::<DescribeSnapshotsError>(cause))
            .or_else(|| classify_sdk_error::<DeleteSnapshotError>(cause))
            .or_else(|| classify_sdk_error::<DescribeInstancesError>(cause));
        if let Some(err) = classified {
            return err;
        }
        // Errors produced by the in-memory fake
        if let Some(err) = cause.downcast_ref::<AwsError>() {
            return err.clone();
        }
    }

    let debug_str = format!("{:?}", error);
    if let Some(code) = extract_error_code(&debug_str) {
        return classify_aws_error(Some(code.as_str()), Some(debug_str.as_str()));
    }

    AwsError::Sdk {
        code: None,
        message: error.to_string(),
    }
}

/// Extract an AWS error code from a debug string representation
fn extract_error_code(debug_str: &str) -> Option<String> {
    let known = NOT_FOUND_CODES
        .iter()
        .chain(THROTTLING_CODES)
        .chain(IN_USE_CODES)
        .chain(UNAUTHORIZED_CODES);
    for code in known {
        if debug_str.contains(code) {
            return Some((*code).to_string());
        }
    }

    // Try to extract any code from `code: Some("...")` pattern
    if let Some(start) = debug_str.find("code: Some(\"") {
        let rest = &debug_str[start + 12..];
        if let Some(end) = rest.find('"') {
            return Some(rest[..end].to_string());
        }
    }

    None
}
