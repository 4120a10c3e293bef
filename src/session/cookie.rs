use crate::config::SessionConfig;
use crate::http::headers::Headers;

/// First value of cookie `name` across all `Cookie` fields.
pub(crate) fn find<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .get_all("Cookie")
        .flat_map(|field| field.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| key.trim() == name)
        .map(|(_, value)| value.trim().trim_matches('"'))
}

/// `Set-Cookie` value issuing `value` for `max_age` seconds.
pub(crate) fn issue(cfg: &SessionConfig, value: &str, max_age: u64) -> String {
    let mut out = format!("{}={}; Max-Age={}", cfg.cookie_name, value, max_age);
    push_attributes(cfg, &mut out);
    out
}

/// `Set-Cookie` value telling the client to drop the cookie.
pub(crate) fn clear(cfg: &SessionConfig) -> String {
    let mut out = format!(
        "{}=; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT",
        cfg.cookie_name
    );
    push_attributes(cfg, &mut out);
    out
}

fn push_attributes(cfg: &SessionConfig, out: &mut String) {
    if !cfg.path.is_empty() {
        out.push_str("; Path=");
        out.push_str(&cfg.path);
    }
    if cfg.http_only {
        out.push_str("; HttpOnly");
    }
    if cfg.secure {
        out.push_str("; Secure");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_cookie_among_several_fields() {
        let mut headers = Headers::new();
        headers.append("Cookie", "theme=dark; lang=en");
        headers.append("Cookie", "SID=abc123");
        assert_eq!(find(&headers, "SID"), Some("abc123"));
        assert_eq!(find(&headers, "lang"), Some("en"));
        assert_eq!(find(&headers, "missing"), None);
    }

    #[test]
    fn formats_attributes() {
        let cfg = SessionConfig {
            secure: true,
            ..SessionConfig::default()
        };
        assert_eq!(
            issue(&cfg, "tok", 900),
            "SID=tok; Max-Age=900; Path=/; HttpOnly; Secure"
        );
        assert!(clear(&cfg).starts_with("SID=; Max-Age=0; Expires="));
    }
}
