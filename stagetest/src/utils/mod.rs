//! Utility functions for resource naming and file handling.

mod files;
mod ids;
mod validation;

pub use files::{copy_folder_to, copy_folder_to_temp, is_excluded};
pub use ids::{unique_id, UNIQUE_ID_LEN};
pub use validation::{validate_dns_label, validate_stage_name, MAX_DNS_LABEL_LEN};
