//! Ignore-list and normalization rules applied to every discovered URL.

use std::collections::HashSet;
use url::Url;

/// Path segments that never point at auditable content. A pattern matches a
/// whole segment, optionally followed by an extension.
const IGNORED_PATH_PATTERNS: &[&str] = &[
    "/wp-admin",
    "/wp-login",
    "/wp-json",
    "/wp-includes",
    "/wp-cron",
    "/xmlrpc.php",
    "/feed",
    "/rss",
    "/comments",
    "/trackback",
    "/cart",
    "/checkout",
    "/my-account",
    "/basket",
    "/tag",
    "/author",
    "/admin",
    "/login",
    "/logout",
    "/cgi-bin",
    "/cdn-cgi",
    "/search",
];

/// Query parameters that mark tracking links or non-content actions.
const IGNORED_QUERY_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "msclkid",
    "mc_cid",
    "mc_eid",
    "_ga",
    "ref",
    "replytocom",
    "add-to-cart",
    "preview",
    "s",
];

const BINARY_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "svg", "ico", "bmp", "avif", "pdf", "zip", "gz", "rar",
    "7z", "tar", "mp3", "mp4", "m4a", "wav", "avi", "mov", "webm", "woff", "woff2", "ttf", "eot",
    "otf", "css", "js", "json", "xml", "txt", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "csv",
    "exe", "dmg",
];

/// Whether a URL hits the non-content ignore list.
pub fn is_ignored(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return true;
    };
    let path = parsed.path().to_lowercase();
    if IGNORED_PATH_PATTERNS
        .iter()
        .any(|pattern| matches_segment(&path, pattern))
    {
        return true;
    }
    parsed.query_pairs().any(|(key, _)| {
        let key = key.to_lowercase();
        IGNORED_QUERY_PARAMS.contains(&key.as_str()) || key.starts_with("utm_")
    })
}

fn matches_segment(path: &str, pattern: &str) -> bool {
    path.match_indices(pattern).any(|(at, _)| {
        matches!(path[at + pattern.len()..].chars().next(), None | Some('/' | '.'))
    })
}

/// Whether a URL points at a static asset rather than a page.
pub fn is_binary_asset(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let path = parsed.path().to_lowercase();
    let last = path.rsplit('/').next().unwrap_or("");
    match last.rsplit_once('.') {
        Some((_, ext)) => BINARY_EXTENSIONS.contains(&ext),
        None => false,
    }
}

pub fn is_auditable(url: &str) -> bool {
    !is_ignored(url) && !is_binary_asset(url)
}

/// Comparison key: scheme and host lowercased, fragment dropped, trailing slash trimmed.
pub fn normalize_key(url: &str) -> String {
    match Url::parse(url.trim()) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            let mut key = parsed.to_string();
            if key.ends_with('/') && parsed.query().is_none() {
                key.pop();
            }
            key
        }
        Err(_) => url.trim().trim_end_matches('/').to_string(),
    }
}

/// Host of a URL with any leading `www.` removed.
pub fn site_domain(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    Some(host.trim_start_matches("www.").to_string())
}

pub fn is_same_site(url: &str, root_domain: &str) -> bool {
    match site_domain(url) {
        Some(host) => host == root_domain || host.ends_with(&format!(".{}", root_domain)),
        None => false,
    }
}

/// Build the final discovered list: homepage first, filtered, deduplicated, capped.
///
/// An empty candidate list stays empty.
pub fn finalize_urls(candidates: Vec<String>, homepage: &str, cap: usize) -> Vec<String> {
    if candidates.is_empty() || cap == 0 {
        return Vec::new();
    }

    let home_key = normalize_key(homepage);
    let mut seen = HashSet::new();
    seen.insert(home_key);

    let mut urls = Vec::with_capacity(cap.min(candidates.len() + 1));
    urls.push(homepage.to_string());

    for candidate in candidates {
        if urls.len() >= cap {
            break;
        }
        let mut parsed = match Url::parse(candidate.trim()) {
            Ok(u) => u,
            Err(_) => continue,
        };
        parsed.set_fragment(None);
        let candidate = parsed.to_string();
        if !is_auditable(&candidate) {
            continue;
        }
        if seen.insert(normalize_key(&candidate)) {
            urls.push(candidate);
        }
    }

    urls
}
