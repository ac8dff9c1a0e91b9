// Field merge policy: primary extractor, then secondary, then a computed default

use url::Url;

/// First present value in priority order.
pub fn resolve<T>(primary: Option<T>, secondary: Option<T>, default: impl FnOnce() -> T) -> T {
    primary.or(secondary).unwrap_or_else(default)
}

/// [`resolve`] for fields that may end up absent.
pub fn resolve_optional<T>(primary: Option<T>, secondary: Option<T>) -> Option<T> {
    resolve(primary.map(Some), secondary.map(Some), || None)
}

/// Like [`resolve`], but blank strings count as absent.
pub fn resolve_text(
    primary: Option<&str>,
    secondary: Option<&str>,
    default: impl FnOnce() -> String,
) -> String {
    resolve(non_blank(primary), non_blank(secondary), default)
}

pub fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Display title for a page with no usable title or heading.
pub fn title_from_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => {
            let path = parsed.path().trim_matches('/');
            if path.is_empty() {
                parsed.host_str().unwrap_or(url).to_string()
            } else {
                format!("/{}", path)
            }
        }
        Err(_) => url.to_string(),
    }
}
