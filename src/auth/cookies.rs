use std::time::Duration;

use axum::http::{
    header::{InvalidHeaderValue, COOKIE, SET_COOKIE},
    HeaderMap, HeaderValue,
};

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

fn build_cookie(
    name: &str,
    value: &str,
    max_age: Duration,
) -> Result<HeaderValue, InvalidHeaderValue> {
    HeaderValue::from_str(&format!(
        "{name}={value}; Path=/; HttpOnly; Secure; SameSite=Lax; Max-Age={}",
        max_age.as_secs()
    ))
}

/// `Set-Cookie` headers for a fresh token pair.
pub fn auth_cookies(
    access_token: &str,
    refresh_token: &str,
    access_ttl: Duration,
    refresh_ttl: Duration,
) -> Result<HeaderMap, InvalidHeaderValue> {
    let mut headers = HeaderMap::new();
    headers.append(
        SET_COOKIE,
        build_cookie(ACCESS_COOKIE, access_token, access_ttl)?,
    );
    headers.append(
        SET_COOKIE,
        build_cookie(REFRESH_COOKIE, refresh_token, refresh_ttl)?,
    );
    Ok(headers)
}

/// `Set-Cookie` headers that clear both auth cookies by name with matching
/// options (Max-Age=0).
pub fn clear_auth_cookies() -> HeaderMap {
    const CLEAR_ACCESS: &str = "accessToken=; Path=/; HttpOnly; Secure; SameSite=Lax; Max-Age=0";
    const CLEAR_REFRESH: &str =
        "refreshToken=; Path=/; HttpOnly; Secure; SameSite=Lax; Max-Age=0";

    let mut headers = HeaderMap::new();
    headers.append(SET_COOKIE, HeaderValue::from_static(CLEAR_ACCESS));
    headers.append(SET_COOKIE, HeaderValue::from_static(CLEAR_REFRESH));
    headers
}

/// Read a cookie value out of the request's `Cookie` header.
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let header = headers.get(COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == name && !val.is_empty() {
            return Some(val.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_cookies_are_http_only_and_secure() {
        let headers = auth_cookies(
            "acc.jwt",
            "ref.jwt",
            Duration::from_secs(300),
            Duration::from_secs(3600),
        )
        .expect("build cookies");
        let values: Vec<&str> = headers
            .get_all(SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(values.len(), 2);
        assert!(values[0].starts_with("accessToken=acc.jwt;"));
        assert!(values[1].starts_with("refreshToken=ref.jwt;"));
        for v in values {
            assert!(v.contains("HttpOnly"));
            assert!(v.contains("Secure"));
            assert!(v.contains("Max-Age="));
        }
    }

    #[test]
    fn clearing_zeroes_max_age_for_both_names() {
        let headers = clear_auth_cookies();
        let values: Vec<&str> = headers
            .get_all(SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(values.len(), 2);
        assert!(values[0].starts_with("accessToken=;"));
        assert!(values[1].starts_with("refreshToken=;"));
        for v in values {
            assert!(v.contains("Max-Age=0"));
        }
    }

    #[test]
    fn cookie_value_parses_the_request_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("accessToken=abc.def; refreshToken=ghi.jkl"),
        );
        assert_eq!(cookie_value(&headers, ACCESS_COOKIE).as_deref(), Some("abc.def"));
        assert_eq!(cookie_value(&headers, REFRESH_COOKIE).as_deref(), Some("ghi.jkl"));
        assert_eq!(cookie_value(&headers, "other"), None);
    }

    #[test]
    fn cookie_value_ignores_empty_values() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("accessToken="));
        assert_eq!(cookie_value(&headers, ACCESS_COOKIE), None);
    }
}
