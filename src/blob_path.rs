//! Blob path resolution against an optional configured prefix.
//!
//! Every relative blob path the service reads or writes goes through
//! [`BlobPathResolver::resolve`], so one deployment can namespace all of its
//! objects under e.g. `staging/` without any caller knowing about it.
//! Resolution is idempotent: a path that already carries the prefix is
//! returned as-is, and the output never contains `//`.

/// Strip surrounding whitespace and slashes from a configured prefix.
///
/// Returns `None` when nothing is left, which means "no prefix".
pub fn sanitize_prefix(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_matches('/').trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(collapse_slashes(trimmed))
    }
}

/// Resolves relative blob paths against an optional prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlobPathResolver {
    prefix: Option<String>,
}

impl BlobPathResolver {
    /// Build a resolver; `prefix` is sanitised with [`sanitize_prefix`].
    pub fn new(prefix: Option<&str>) -> Self {
        Self {
            prefix: prefix.and_then(sanitize_prefix),
        }
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Resolve `path` against the prefix.
    ///
    /// Leading slashes are stripped and repeated slashes collapsed. The
    /// prefix is prepended only if the path does not already start with
    /// `prefix + "/"` (or equal the prefix itself).
    pub fn resolve(&self, path: &str) -> String {
        let cleaned = collapse_slashes(path.trim().trim_start_matches('/'));
        match &self.prefix {
            None => cleaned,
            Some(prefix) => {
                if cleaned.is_empty() || cleaned == *prefix {
                    prefix.clone()
                } else if cleaned.starts_with(prefix.as_str())
                    && cleaned[prefix.len()..].starts_with('/')
                {
                    cleaned
                } else {
                    format!("{prefix}/{cleaned}")
                }
            }
        }
    }
}

/// Join path segments with single slashes, ignoring empty segments.
pub fn join_blob_path<I, S>(segments: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let joined = segments
        .into_iter()
        .map(|s| s.as_ref().trim().trim_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/");
    collapse_slashes(&joined)
}

fn collapse_slashes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_slash = false;
    for c in s.chars() {
        if c == '/' {
            if !prev_slash {
                out.push(c);
            }
            prev_slash = true;
        } else {
            out.push(c);
            prev_slash = false;
        }
    }
    out
}
