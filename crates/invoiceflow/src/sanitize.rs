//! Helpers for keeping file locations and webhook credentials out of logs
//! and span attributes.

use std::path::Path;

/// Returns only the filename component of a path (no directory).
pub fn redact_path(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("<unknown>")
        .to_string()
}

/// Masks userinfo and drops the query string of a webhook URL. Webhook
/// tokens usually travel in one of the two.
///
/// - `https://user:pw@hooks.example.com/a?token=x` → `https://****@hooks.example.com/a?****`
/// - `https://hooks.example.com/a` → unchanged
pub fn redact_url(url: &str) -> String {
    let (base, has_query) = match url.split_once('?') {
        Some((base, _)) => (base, true),
        None => (url, false),
    };

    let mut out = match base.find("://") {
        Some(scheme_end) => {
            let (scheme, rest) = base.split_at(scheme_end + 3);
            let authority_end = rest.find('/').unwrap_or(rest.len());
            match rest[..authority_end].rfind('@') {
                Some(at) => format!("{}****@{}", scheme, &rest[at + 1..]),
                None => base.to_string(),
            }
        }
        None => base.to_string(),
    };

    if has_query {
        out.push_str("?****");
    }
    out
}
