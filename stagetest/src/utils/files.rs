//! Copying infrastructure module trees into isolated temp folders.
//!
//! Terraform keeps state next to the module, so every run works on its own
//! copy of the examples to avoid two runs sharing state.

use super::unique_id;
use crate::errors::HarnessError;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Returns true if a path component should not be copied.
///
/// Hidden entries (which covers `.terraform`), local state files and local
/// variable files are left behind.
#[must_use]
pub fn is_excluded(file_name: &str) -> bool {
    file_name.starts_with('.')
        || file_name.ends_with(".tfstate")
        || file_name.ends_with(".tfstate.backup")
        || file_name == "terraform.tfvars"
        || file_name == "terraform.tfvars.json"
}

fn copy_tree(src: &Path, dest: &Path) -> std::io::Result<u64> {
    fs::create_dir_all(dest)?;
    let mut copied = 0;
    let walker = WalkDir::new(src)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !is_excluded(&e.file_name().to_string_lossy()));
    for entry in walker {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(std::io::Error::other)?;
        let target = dest.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target)?;
            copied += 1;
        } else {
            debug!(path = %entry.path().display(), "Skipping non-regular file");
        }
    }
    Ok(copied)
}

/// Copies `root` into a fresh directory under `temp_root` and returns the
/// path of `sub_folder` inside the copy.
pub async fn copy_folder_to(
    root: &Path,
    sub_folder: &str,
    temp_root: &Path,
) -> Result<PathBuf, HarnessError> {
    let source = root.join(sub_folder);
    if !source.is_dir() {
        return Err(HarnessError::config(format!(
            "Folder to copy does not exist: {}",
            source.display()
        )));
    }

    let base = root
        .canonicalize()?
        .file_name()
        .map_or_else(|| "root".to_string(), |n| n.to_string_lossy().into_owned());
    let dest = temp_root.join(format!("{base}-{}", unique_id()));

    let src = root.to_path_buf();
    let target = dest.clone();
    let copied = tokio::task::spawn_blocking(move || copy_tree(&src, &target))
        .await
        .map_err(|e| HarnessError::Internal(format!("Copy task join error: {e}")))??;

    info!(
        from = %root.display(),
        to = %dest.display(),
        files = copied,
        "Copied folder to temp"
    );
    Ok(dest.join(sub_folder))
}

/// Copies `root` into the system temp directory. See [`copy_folder_to`].
pub async fn copy_folder_to_temp(root: &Path, sub_folder: &str) -> Result<PathBuf, HarnessError> {
    copy_folder_to(root, sub_folder, &std::env::temp_dir()).await
}
