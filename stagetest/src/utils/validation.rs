//! Name validation for stages and Kubernetes objects.

use crate::errors::HarnessError;
use regex::Regex;
use std::sync::LazyLock;

/// Maximum length of a DNS-1123 label (namespace, service account).
pub const MAX_DNS_LABEL_LEN: usize = 63;

#[allow(clippy::expect_used)]
static STAGE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.\-]*$").expect("valid stage name pattern"));

#[allow(clippy::expect_used)]
static DNS_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("valid DNS label pattern"));

/// Validates a stage name.
///
/// Stage names key the skip configuration and the `SKIP_<name>` environment
/// variables, so they are limited to characters that are valid there.
pub fn validate_stage_name(name: &str) -> Result<(), HarnessError> {
    if STAGE_NAME.is_match(name) {
        Ok(())
    } else {
        Err(HarnessError::config(format!(
            "Invalid stage name '{name}': use letters, digits, '_', '.' or '-'"
        )))
    }
}

/// Validates a Kubernetes DNS-1123 label.
pub fn validate_dns_label(name: &str) -> Result<(), HarnessError> {
    if name.len() > MAX_DNS_LABEL_LEN {
        return Err(HarnessError::config(format!(
            "Kubernetes name '{name}' is longer than {MAX_DNS_LABEL_LEN} characters"
        )));
    }
    if !DNS_LABEL.is_match(name) {
        return Err(HarnessError::config(format!(
            "Kubernetes name '{name}' must be lower case alphanumerics or '-', \
             starting and ending with an alphanumeric"
        )));
    }
    Ok(())
}
