use std::net::IpAddr;
use thiserror::Error;
use url::{Host, Url};

/// Reasons a user-supplied address cannot be used as a feed source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UrlValidationError {
    /// Nothing but whitespace was supplied.
    #[error("URL is empty")]
    Empty,
    /// The text does not parse as an absolute URL.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// Only http and https are fetched.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,
    /// The host resolves to a private or link-local literal address.
    #[error("Private IP address not allowed: {0}")]
    PrivateIp(String),
    /// The host is localhost or a loopback literal.
    #[error("Localhost not allowed")]
    Localhost,
}

/// Turns raw user input into an absolute URL string.
///
/// Whitespace is trimmed and `https://` is prepended when the input does not
/// already start with `http://` or `https://` (in any letter case). No
/// parsing happens here; see [`validate_url`].
pub fn normalize_input_url(raw: &str) -> Result<String, UrlValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(UrlValidationError::Empty);
    }

    let has_scheme = ["http://", "https://"].iter().any(|prefix| {
        trimmed
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
    });

    if has_scheme {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("https://{}", trimmed))
    }
}

/// Parses and checks a URL before anything is fetched from it.
///
/// Rejects non-HTTP(S) schemes and, unless `allow_private` is set,
/// localhost and private/link-local address literals.
pub fn validate_url(url_str: &str, allow_private: bool) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str)?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    let host = url.host().ok_or(UrlValidationError::MissingHost)?;
    if allow_private {
        return Ok(url);
    }

    let ip = match host {
        Host::Domain(domain) if domain.eq_ignore_ascii_case("localhost") => {
            return Err(UrlValidationError::Localhost)
        }
        Host::Domain(_) => return Ok(url),
        Host::Ipv4(v4) => IpAddr::V4(v4),
        Host::Ipv6(v6) => IpAddr::V6(v6),
    };

    if ip.is_loopback() {
        return Err(UrlValidationError::Localhost);
    }
    if is_private_ip(&ip) {
        return Err(UrlValidationError::PrivateIp(ip.to_string()));
    }

    Ok(url)
}

/// `scheme://host[:port]` of a URL, without a trailing slash.
pub fn origin_of(url: &Url) -> String {
    url.origin().ascii_serialization()
}

/// Host of a URL with a leading `www.` removed, used as the favicon key.
pub fn site_domain(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    let host = host.strip_prefix("www.").unwrap_or(host);
    Some(host.to_ascii_lowercase())
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_link_local() || v4.is_unspecified(),
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_unspecified()
                // fc00::/7 unique local
                || (first & 0xfe00) == 0xfc00
                // fe80::/10 link local
                || (first & 0xffc0) == 0xfe80
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_prepends_https() {
        assert_eq!(normalize_input_url("example.com").unwrap(), "https://example.com");
        assert_eq!(
            normalize_input_url("  example.com/blog  ").unwrap(),
            "https://example.com/blog"
        );
    }

    #[test]
    fn test_normalize_keeps_existing_scheme_any_case() {
        assert_eq!(normalize_input_url("http://a.test").unwrap(), "http://a.test");
        assert_eq!(normalize_input_url("HTTPS://A.test/x").unwrap(), "HTTPS://A.test/x");
    }

    #[test]
    fn test_normalize_rejects_blank() {
        assert_eq!(normalize_input_url("   "), Err(UrlValidationError::Empty));
    }

    #[test]
    fn test_validate_accepts_public_url() {
        let url = validate_url("https://example.com/feed.xml", false).unwrap();
        assert_eq!(url.host_str(), Some("example.com"));
    }

    #[test]
    fn test_validate_rejects_bad_scheme() {
        assert!(matches!(
            validate_url("ftp://example.com/feed", false),
            Err(UrlValidationError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_validate_rejects_garbage() {
        assert!(matches!(
            validate_url("https://exa mple.com", false),
            Err(UrlValidationError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_validate_private_hosts() {
        assert_eq!(
            validate_url("http://localhost/feed", false),
            Err(UrlValidationError::Localhost)
        );
        assert_eq!(
            validate_url("http://127.0.0.1:8080/feed", false),
            Err(UrlValidationError::Localhost)
        );
        assert!(matches!(
            validate_url("http://192.168.1.10/rss", false),
            Err(UrlValidationError::PrivateIp(_))
        ));
        assert!(matches!(
            validate_url("http://[fd00::1]/rss", false),
            Err(UrlValidationError::PrivateIp(_))
        ));
    }

    #[test]
    fn test_validate_allow_private() {
        assert!(validate_url("http://127.0.0.1:8080/feed", true).is_ok());
    }

    #[test]
    fn test_origin_and_domain() {
        let url = Url::parse("https://www.Example.com:8443/blog/post?x=1").unwrap();
        assert_eq!(origin_of(&url), "https://www.example.com:8443");
        assert_eq!(site_domain(&url).as_deref(), Some("example.com"));
    }
}
