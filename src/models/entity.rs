use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{GraphError, Result};

/// Reserved predicates carried by every entity. User-defined predicates may
/// not start with `$`.
pub const RESERVED_PREDICATES: [&str; 3] = ["$id", "$type", "$context"];

const MAX_PREDICATE_BYTES: usize = 256;

/// An absolute URL acting as a globally unique node identifier. The full URL
/// is the identity; there is no colon-prefixed short form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw)
            .map_err(|e| GraphError::Validation(format!("entity id {raw:?}: {e}")))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(GraphError::Validation(format!(
                "entity id {raw:?}: scheme must be http or https"
            )));
        }
        if url.host_str().is_none() {
            return Err(GraphError::Validation(format!(
                "entity id {raw:?}: missing host"
            )));
        }
        Ok(EntityId(raw.to_string()))
    }

    /// Wrap a string that was validated when it was first written. Only for
    /// values read back from our own storage.
    pub(crate) fn from_trusted(raw: String) -> Self {
        EntityId(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Origin plus the path prefix up to (but excluding) the local-id segment.
    pub fn namespace(&self) -> String {
        // The id was validated at construction, so re-parsing cannot fail.
        match Url::parse(&self.0) {
            Ok(url) => {
                let origin = url.origin().ascii_serialization();
                let path = url.path();
                match path.rfind('/') {
                    Some(0) | None => origin,
                    Some(idx) => format!("{origin}{}", &path[..idx]),
                }
            }
            Err(_) => self.0.clone(),
        }
    }

    /// Sort key used for chunk ordering: reversed hostname segments followed
    /// by path segments, comma-separated. Groups ids from the same origin and
    /// path prefix into contiguous runs.
    pub fn sort_key(&self) -> String {
        match Url::parse(&self.0) {
            Ok(url) => {
                let mut parts: Vec<String> = url
                    .host_str()
                    .unwrap_or_default()
                    .split('.')
                    .rev()
                    .map(|s| s.to_string())
                    .collect();
                parts.extend(
                    url.path()
                        .split('/')
                        .filter(|s| !s.is_empty())
                        .map(|s| s.to_string()),
                );
                parts.join(",")
            }
            Err(_) => self.0.clone(),
        }
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validate a predicate name: nonempty, colon-free, bounded, and `$`-prefixed
/// only for the reserved set.
pub fn validate_predicate(predicate: &str) -> Result<()> {
    if predicate.is_empty() {
        return Err(GraphError::Validation("predicate is empty".to_string()));
    }
    if predicate.len() > MAX_PREDICATE_BYTES {
        return Err(GraphError::Validation(format!(
            "predicate exceeds {MAX_PREDICATE_BYTES} bytes"
        )));
    }
    if predicate.contains(':') {
        return Err(GraphError::Validation(format!(
            "predicate {predicate:?} contains ':'"
        )));
    }
    if predicate.starts_with('$') && !RESERVED_PREDICATES.contains(&predicate) {
        return Err(GraphError::Validation(format!(
            "predicate {predicate:?} uses the reserved '$' prefix"
        )));
    }
    Ok(())
}
