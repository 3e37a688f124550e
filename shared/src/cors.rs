use lambda_http::http::header::{HeaderValue, VARY};
use lambda_http::{Body, Response};

/// Origin to echo back: the request origin when it is allowed, otherwise the
/// first configured origin.
pub fn cors_origin(allowed: &str, request_origin: Option<&str>) -> String {
    if allowed.trim() == "*" {
        return "*".to_string();
    }
    let mut origins = allowed.split(',').map(str::trim).filter(|o| !o.is_empty());
    match request_origin {
        Some(origin) if allowed.split(',').any(|o| o.trim() == origin) => origin.to_string(),
        _ => origins.next().unwrap_or("*").to_string(),
    }
}

pub fn with_cors_headers(mut resp: Response<Body>, allowed: &str, request_origin: Option<&str>) -> Response<Body> {
    let origin = cors_origin(allowed, request_origin);
    let headers = resp.headers_mut();
    headers.insert(
        "Access-Control-Allow-Origin",
        HeaderValue::from_str(&origin).unwrap_or_else(|_| HeaderValue::from_static("*")),
    );
    headers.insert(
        "Access-Control-Allow-Methods",
        HeaderValue::from_static("GET,POST,PATCH,DELETE,OPTIONS"),
    );
    headers.insert(
        "Access-Control-Allow-Headers",
        HeaderValue::from_static("Content-Type,Authorization,X-User-Id"),
    );
    headers.append(VARY, HeaderValue::from_static("Origin"));
    resp
}
