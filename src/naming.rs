//! Remote file names derived from local ones.

use chrono::NaiveDateTime;
use std::collections::HashSet;
use std::path::Path;

const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Last path component of `name`, accepting both `/` and `\` separators.
fn base_name(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

/// Insert `_{suffix}` before the extension, or append it when there is none.
fn insert_suffix(name: &str, suffix: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}_{suffix}.{ext}"),
        _ => format!("{name}_{suffix}"),
    }
}

/// `ComfyUI_00001.png` at 2024-01-01 12:00:00 becomes
/// `ComfyUI_00001_20240101_120000.png`.
pub fn timestamped_remote_name(local_file_name: &str, now: NaiveDateTime) -> String {
    insert_suffix(base_name(local_file_name), &now.format(STAMP_FORMAT).to_string())
}

/// Rename repeated entries so every name in the batch is distinct. The first
/// occurrence keeps its name; later ones get `_2`, `_3`, ... before the
/// extension, skipping any name already planned. Returns `(old, new)` pairs.
pub fn disambiguate(names: &mut [Option<String>]) -> Vec<(String, String)> {
    let mut taken: HashSet<String> = names.iter().flatten().cloned().collect();
    let mut seen = HashSet::new();
    let mut renamed = Vec::new();
    for name in names.iter_mut().flatten() {
        if seen.insert(name.clone()) {
            continue;
        }
        let candidate = (2..)
            .map(|n| insert_suffix(name, &n.to_string()))
            .find(|c| !taken.contains(c))
            .unwrap_or_else(|| name.clone());
        taken.insert(candidate.clone());
        seen.insert(candidate.clone());
        renamed.push((std::mem::replace(name, candidate.clone()), candidate));
    }
    renamed
}

/// Remote name for a local path, or `None` when the path has no file name.
pub fn remote_name_for(path: &Path, timestamp: Option<NaiveDateTime>) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    Some(match timestamp {
        Some(now) => timestamped_remote_name(name, now),
        None => base_name(name).to_string(),
    })
}
