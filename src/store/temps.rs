use std::path::{Path, PathBuf};

use uuid::Uuid;

/// Sibling path a download is written to before being renamed into place,
/// so an interrupted transfer never looks like a finished file.
pub fn partial_path(final_path: &Path) -> PathBuf {
    let name = final_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    final_path.with_file_name(format!(".{}.{}.part", name, Uuid::now_v7()))
}

#[cfg(test)]
pub fn is_partial(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.') && n.ends_with(".part"))
}
