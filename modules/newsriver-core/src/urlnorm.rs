//! Canonical URL normalization.
//!
//! Articles about the same page arrive with tracking query params, fragments,
//! mixed-case hosts, and trailing slashes. Canonicalization collapses those
//! variants to one form so the exact-URL dedup rule can fire on a hash
//! equality. Canonicalizing an already-canonical URL returns it unchanged.

use url::Url;

/// Query parameters stripped by prefix match.
const TRACKING_PREFIXES: &[&str] = &["utm_", "mc_"];

/// Query parameters stripped by exact match.
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "ref", "ref_src"];

fn is_tracking_param(name: &str) -> bool {
    TRACKING_PREFIXES.iter().any(|p| name.starts_with(p))
        || TRACKING_PARAMS.contains(&name)
}

/// Canonicalize a URL. Returns `None` when the input doesn't parse as an
/// absolute URL; callers treat that as "no canonical URL".
pub fn canonicalize_url(raw: &str) -> Option<String> {
    let mut parsed = Url::parse(raw.trim()).ok()?;
    parsed.host_str()?;

    // Fragments never address distinct content
    parsed.set_fragment(None);

    // Lowercase host (the parser lowercases registered domains already, this
    // covers oddball hosts it leaves alone)
    if let Some(host) = parsed.host_str() {
        let lower = host.to_lowercase();
        if lower != host {
            parsed.set_host(Some(&lower)).ok()?;
        }
    }

    // Drop explicit default ports
    if parsed.port() == Some(80) && parsed.scheme() == "http"
        || parsed.port() == Some(443) && parsed.scheme() == "https"
    {
        let _ = parsed.set_port(None);
    }

    // Strip tracking params, preserving the order of what survives
    if parsed.query().is_some() {
        let kept: Vec<(String, String)> = parsed
            .query_pairs()
            .filter(|(k, _)| !is_tracking_param(k))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if kept.is_empty() {
            parsed.set_query(None);
        } else {
            let rebuilt: Vec<String> = kept
                .iter()
                .map(|(k, v)| {
                    if v.is_empty() {
                        k.clone()
                    } else {
                        format!("{k}={v}")
                    }
                })
                .collect();
            parsed.set_query(Some(&rebuilt.join("&")));
        }
    }

    // Remove trailing slash from the path (unless the path is just "/")
    let path = parsed.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        parsed.set_path(path.trim_end_matches('/'));
    }

    Some(parsed.to_string())
}

/// Host of the canonical URL, used as `source_domain` on articles.
pub fn source_domain(canonical_url: &str) -> Option<String> {
    Url::parse(canonical_url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
}
