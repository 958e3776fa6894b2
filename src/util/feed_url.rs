use std::net::IpAddr;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum FeedUrlError {
    #[error("Invalid feed URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    #[error("Feed URL has no host")]
    MissingHost,
    /// Loopback, private or link-local address while `allow_private` is off.
    #[error("Refusing non-public address: {0} (pass --allow-private to sync it)")]
    NonPublicAddress(String),
}

/// Parse and check a feed URL before handing it to the pipeline.
///
/// Only `http` and `https` are accepted. Unless `allow_private` is set, hosts
/// that are `localhost` or literal loopback/private/link-local IPs are
/// rejected. Hostnames are not resolved.
pub fn validate_feed_url(raw: &str, allow_private: bool) -> Result<Url, FeedUrlError> {
    let url = Url::parse(raw.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(FeedUrlError::UnsupportedScheme(scheme.to_owned())),
    }

    let host = url.host_str().ok_or(FeedUrlError::MissingHost)?;
    if allow_private {
        return Ok(url);
    }

    if host.eq_ignore_ascii_case("localhost") {
        return Err(FeedUrlError::NonPublicAddress(host.to_owned()));
    }

    let bare = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if let Ok(ip) = bare.parse::<IpAddr>() {
        if is_non_public(&ip) {
            return Err(FeedUrlError::NonPublicAddress(ip.to_string()));
        }
    }

    Ok(url)
}

fn is_non_public(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            // fc00::/7 unique local, fe80::/10 link local
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_feed_urls_accepted() {
        let url = validate_feed_url(
            "https://feeds.elpais.com/mrss-s/pages/ep/site/elpais.com/portada",
            false,
        )
        .unwrap();
        assert_eq!(url.host_str(), Some("feeds.elpais.com"));
        assert!(validate_feed_url("http://news.example.org:8080/rss", false).is_ok());
    }

    #[test]
    fn test_surrounding_whitespace_is_trimmed() {
        assert!(validate_feed_url("  https://example.com/rss\n", false).is_ok());
    }

    #[test]
    fn test_non_http_schemes_rejected() {
        assert!(matches!(
            validate_feed_url("file:///etc/passwd", false),
            Err(FeedUrlError::UnsupportedScheme(s)) if s == "file"
        ));
        assert!(matches!(
            validate_feed_url("ftp://example.com/rss", true),
            Err(FeedUrlError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_unparseable_url_rejected() {
        assert!(matches!(
            validate_feed_url("not a url", false),
            Err(FeedUrlError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_non_public_hosts_rejected() {
        for url in [
            "http://localhost/rss",
            "http://127.0.0.1/rss",
            "http://10.0.0.1:3000/rss",
            "http://192.168.1.1/rss",
            "http://169.254.1.1/rss",
            "http://0.0.0.0/rss",
            "http://[::1]/rss",
            "http://[fe80::1]/rss",
            "http://[fd00::1]/rss",
        ] {
            assert!(
                matches!(
                    validate_feed_url(url, false),
                    Err(FeedUrlError::NonPublicAddress(_))
                ),
                "{url} should be rejected"
            );
        }
    }

    #[test]
    fn test_allow_private_accepts_local_hosts() {
        assert!(validate_feed_url("http://127.0.0.1:8080/rss", true).is_ok());
        assert!(validate_feed_url("http://localhost/rss", true).is_ok());
    }
}
