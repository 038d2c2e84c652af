// ── Remote path policy ───────────────────────────────────────────────────────
//
// The remote side is always treated as POSIX, whatever the local platform.

use crate::sftp::types::{UploadFailure, UploadFailureKind};

/// Normalise a remote directory: `\` becomes `/` and trailing slashes are
/// dropped (the root stays `/`).
pub fn normalize_remote_dir(directory: &str) -> String {
    let posix = directory.replace('\\', "/");
    let trimmed = posix.trim_end_matches('/');
    if trimmed.is_empty() && posix.starts_with('/') {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Join a remote directory and a single filename with exactly one `/`.
pub fn join_remote_path(directory: &str, filename: &str) -> String {
    let dir = normalize_remote_dir(directory);
    match dir.as_str() {
        "" => filename.to_string(),
        "/" => format!("/{filename}"),
        _ => format!("{dir}/{filename}"),
    }
}

/// A remote filename must be one non-empty path segment.
pub fn validate_remote_filename(name: &str) -> Result<(), UploadFailure> {
    let reason = if name.is_empty() {
        Some("is empty")
    } else if name.contains('/') || name.contains('\\') {
        Some("contains a directory separator")
    } else if name == "." || name == ".." {
        Some("is a relative directory reference")
    } else if name.contains('\0') {
        Some("contains a NUL byte")
    } else {
        None
    };

    match reason {
        Some(r) => Err(UploadFailure::new(
            UploadFailureKind::TransferFailed,
            format!("remote filename '{name}' {r}"),
        )),
        None => Ok(()),
    }
}
