use std::sync::LazyLock;

use regex::Regex;

// RFC 3986, appendix B.
static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:([^:/?#]+):)?(?://([^/?#]*))?([^?#]*)(?:\?([^#]*))?(?:#(.*))?$")
        .expect("URI reference pattern")
});

static AUTHORITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(([^:@]*)(?::([^@]*))?)@)?(\[[^\]]*\]|[^:]*)(?::(.*))?$")
        .expect("authority pattern")
});

/// Generic-syntax components of a URI reference.
///
/// Absent components are empty strings; nothing is percent-decoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Url {
    pub scheme: String,
    pub authority: String,
    pub userinfo: String,
    pub username: String,
    pub password: String,
    pub hostname: String,
    pub port: String,
    pub path: String,
    pub query: String,
    pub fragment: String,
}

impl Url {
    /// Splits `input` per RFC 3986 generic syntax. Relative references
    /// (`/path?x#y`) are accepted.
    pub fn split(input: &str) -> Self {
        let mut url = Url::default();

        let Some(caps) = REFERENCE.captures(input) else {
            return url;
        };
        let part = |i: usize| caps.get(i).map(|m| m.as_str().to_string()).unwrap_or_default();

        url.scheme = part(1);
        url.authority = part(2);
        url.path = part(3);
        url.query = part(4);
        url.fragment = part(5);

        if let Some(auth) = AUTHORITY.captures(&url.authority) {
            let part = |i: usize| auth.get(i).map(|m| m.as_str().to_string()).unwrap_or_default();
            url.userinfo = part(1);
            url.username = part(2);
            url.password = part(3);
            url.hostname = part(4);
            url.port = part(5);
        }

        url
    }
}
