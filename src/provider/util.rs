use std::time::Duration;

pub(crate) fn retriable_status(code: u16) -> bool {
    matches!(code, 500 | 502 | 503 | 504 | 429 | 408)
}

/// Grows a polling interval by half, never past `max`.
pub(crate) fn backoff(current: Duration, max: Duration) -> Duration {
    let next = Duration::from_secs_f64((current.as_secs_f64() * 1.5).max(1.0));
    next.min(max)
}

/// Splits a legacy `<UID>:<KEY>` key into basic-auth parts.
pub(crate) fn split_key_basic(key: &str) -> Option<(String, String)> {
    let (user, pass) = key.split_once(':')?;
    let (user, pass) = (user.trim(), pass.trim());
    if user.is_empty() || pass.is_empty() {
        return None;
    }
    Some((user.to_string(), pass.to_string()))
}

pub(crate) fn urljoin(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    let base = base.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

pub(crate) fn append_query(url: &str, params: &[(&str, &str)]) -> String {
    let query = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{}{}{}", url, sep, query)
}

/// The `/api/v2` form of a base URL, for servers that only answer there.
pub(crate) fn api_v2_variant(base: &str) -> Option<String> {
    let b = base.trim_end_matches('/');
    if b.ends_with("/api") {
        return Some(format!("{}/v2", b));
    }
    if !b.contains("/api/") && !b.ends_with("/api/v2") {
        return Some(format!("{}/api/v2", b));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let max = Duration::from_secs(120);
        assert_eq!(backoff(Duration::from_secs(1), max), Duration::from_secs_f64(1.5));
        assert_eq!(backoff(Duration::ZERO, max), Duration::from_secs(1));
        assert_eq!(backoff(Duration::from_secs(100), max), max);
    }

    #[test]
    fn key_split_requires_both_halves() {
        assert_eq!(
            split_key_basic("123:abc"),
            Some(("123".to_string(), "abc".to_string()))
        );
        assert_eq!(split_key_basic("token"), None);
        assert_eq!(split_key_basic(":abc"), None);
        assert_eq!(split_key_basic("123:"), None);
    }

    #[test]
    fn urljoin_handles_absolute_and_relative() {
        assert_eq!(urljoin("https://a/api/", "/x"), "https://a/api/x");
        assert_eq!(urljoin("https://a/api", "x"), "https://a/api/x");
        assert_eq!(urljoin("https://a/api", "https://b/y"), "https://b/y");
    }

    #[test]
    fn query_is_appended_with_right_separator() {
        assert_eq!(
            append_query("https://a/jobs/1", &[("log", "true"), ("request", "true")]),
            "https://a/jobs/1?log=true&request=true"
        );
        assert_eq!(append_query("https://a/?x=1", &[("y", "2")]), "https://a/?x=1&y=2");
    }

    #[test]
    fn v2_variant() {
        assert_eq!(api_v2_variant("https://a/api").as_deref(), Some("https://a/api/v2"));
        assert_eq!(api_v2_variant("https://a").as_deref(), Some("https://a/api/v2"));
        assert_eq!(api_v2_variant("https://a/api/v2"), None);
    }
}
