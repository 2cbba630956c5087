//! `Set-Cookie` rendering for the handshake cookie.

use crate::config::CookieOptions;

/// Render a `Set-Cookie` value carrying `value`
pub fn render_set_cookie(options: &CookieOptions, value: &str) -> String {
    let mut cookie = format!("{}={}", options.name, value);

    if let Some(expires) = options.expires {
        cookie.push_str(&format!(
            "; Expires={}",
            expires.format("%a, %d %b %Y %H:%M:%S GMT")
        ));
    }
    if let Some(max_age) = options.max_age {
        cookie.push_str(&format!("; Max-Age={}", max_age));
    }
    if let Some(domain) = &options.domain {
        cookie.push_str(&format!("; Domain={}", domain));
    }
    if let Some(path) = &options.path {
        cookie.push_str(&format!("; Path={}", path));
    }
    if options.secure {
        cookie.push_str("; Secure");
    }
    if options.http_only {
        cookie.push_str("; HttpOnly");
    }
    if let Some(same_site) = options.same_site {
        cookie.push_str(&format!("; SameSite={}", same_site));
    }

    cookie
}

/// Fresh random cookie value
pub fn new_cookie_value() -> String {
    uuid::Uuid::new_v4().to_string()
}
