//! URL canonicalization for job deduplication
//!
//! Two URLs that normalize to the same string are treated as the same video.

use url::Url;

/// Query keys dropped regardless of case, on top of every `utm_*` key
const TRACKING_PARAMS: &[&str] = &[
    "fbclid", "gclid", "dclid", "gbraid", "wbraid", "msclkid", "twclid", "ttclid", "li_fat_id",
    "igshid", "igsh", "si", "mc_cid", "mc_eid", "_ga", "yclid", "ref_src", "ref_url", "feature",
];

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

/// Canonicalizes a URL for cache lookups
///
/// Trims whitespace, lower-cases scheme and host, drops tracking parameters
/// and the fragment, and strips a trailing `/` from the path. Remaining query
/// pairs keep their order and duplicates. Input that does not parse as an
/// absolute URL is returned trimmed.
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let Ok(mut parsed) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };

    parsed.set_fragment(None);

    if parsed.query().is_some() {
        let kept: Vec<(String, String)> = parsed
            .query_pairs()
            .filter(|(key, _)| !is_tracking_param(key))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        if kept.is_empty() {
            parsed.set_query(None);
        } else {
            parsed.query_pairs_mut().clear().extend_pairs(kept);
        }
    }

    let path = parsed.path();
    if path.len() > 1 && path.ends_with('/') {
        let stripped = path.trim_end_matches('/').to_string();
        parsed.set_path(&stripped);
    }

    // The url crate already lower-cases scheme and host for special schemes.
    parsed.to_string()
}

/// Returns true for platforms whose captions can replace audio transcription
pub fn is_caption_platform(url: &str) -> bool {
    host_of(url)
        .map(|host| {
            ["youtube.com", "youtu.be", "youtube-nocookie.com"]
                .iter()
                .any(|domain| host == *domain || host.ends_with(&format!(".{domain}")))
        })
        .unwrap_or(false)
}

fn host_of(url: &str) -> Option<String> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return None;
    }
    let parsed = Url::parse(trimmed)
        .or_else(|_| Url::parse(&format!("https://{trimmed}")))
        .ok()?;
    parsed.host_str().map(|h| h.to_ascii_lowercase())
}
