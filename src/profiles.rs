//! Named remote directories, loaded from a JSON document:
//!
//! ```json
//! { "profiles": { "default": "/tmp/", "renders": "/srv/renders" } }
//! ```
//!
//! Loading never fails. Anything unusable falls back to a single `default`
//! profile pointing at `/tmp/`.

use serde_json::Value;
use std::path::Path;
use tracing::{debug, warn};

pub const DEFAULT_PROFILE: &str = "default";
pub const FALLBACK_DIRECTORY: &str = "/tmp/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileSet {
    entries: Vec<(String, String)>,
}

impl Default for ProfileSet {
    fn default() -> Self {
        Self {
            entries: vec![(DEFAULT_PROFILE.to_string(), FALLBACK_DIRECTORY.to_string())],
        }
    }
}

impl ProfileSet {
    pub fn load(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "profiles file not found, using default profile");
                return Self::default();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot read profiles file, using default profile");
                return Self::default();
            }
        };
        match Self::from_json_str(&text) {
            Ok(set) => {
                debug!(path = %path.display(), count = set.entries.len(), "profiles loaded");
                set
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "malformed profiles file, using default profile");
                Self::default()
            }
        }
    }

    /// Parse a profiles document. Syntax errors are returned; a valid
    /// document without a usable `profiles` object yields the default set.
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        let doc: Value = serde_json::from_str(text)?;
        let Some(map) = doc.get("profiles").and_then(Value::as_object) else {
            return Ok(Self::default());
        };
        let entries: Vec<(String, String)> = map
            .iter()
            .filter_map(|(name, dir)| match dir.as_str() {
                Some(d) => Some((name.clone(), d.to_string())),
                None => {
                    warn!(profile = %name, "profile directory is not a string, ignoring");
                    None
                }
            })
            .collect();
        if entries.is_empty() {
            return Ok(Self::default());
        }
        Ok(Self { entries })
    }

    /// Directory for `name`, or `/tmp/` when no such profile exists.
    pub fn resolve(&self, name: &str) -> &str {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d.as_str())
            .unwrap_or(FALLBACK_DIRECTORY)
    }

    /// Profile names in document order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, d)| (n.as_str(), d.as_str()))
    }
}
