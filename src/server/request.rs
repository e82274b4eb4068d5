use crate::dispatcher::RequestContext;
use crate::ids::RequestId;
use http::Method;
use may_minihttp::Request;
use std::collections::HashMap;
use tracing::debug;

/// Parse cookies out of a lowercase header map.
pub fn parse_cookies(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .get("cookie")
        .map(|c| {
            c.split(';')
                .filter_map(|pair| {
                    let mut parts = pair.trim().splitn(2, '=');
                    let name = parts.next()?.trim().to_string();
                    let value = parts.next().unwrap_or("").trim().to_string();
                    Some((name, value))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Parse query string parameters from a URL path.
///
/// Extracts everything after the `?` character and URL-decodes parameter
/// names and values.
pub fn parse_query_params(path: &str) -> HashMap<String, String> {
    if let Some(pos) = path.find('?') {
        let query_str = &path[pos + 1..];
        url::form_urlencoded::parse(query_str.as_bytes())
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    } else {
        HashMap::new()
    }
}

/// Extract a [`RequestContext`] from a raw HTTP request.
///
/// Headers are lowercased and cookies pre-parsed; the path keeps its query
/// string — the middleware chain normalizes it before the first layer runs.
/// The request id is taken from an `x-request-id` header when present so
/// upstream correlation survives, otherwise a fresh one is minted.
pub fn parse_request(req: Request) -> RequestContext {
    let method: Method = req.method().parse().unwrap_or(Method::GET);
    let path = req.path().to_string();

    let headers: HashMap<String, String> = req
        .headers()
        .iter()
        .map(|h| {
            (
                h.name.to_ascii_lowercase(),
                String::from_utf8_lossy(h.value).to_string(),
            )
        })
        .collect();

    let cookies = parse_cookies(&headers);
    let request_id = RequestId::from_header_or_new(headers.get("x-request-id").map(String::as_str));

    debug!(
        request_id = %request_id,
        method = %method,
        path = %path,
        header_count = headers.len(),
        cookie_count = cookies.len(),
        "HTTP request parsed"
    );

    let mut ctx = RequestContext::new(method, path);
    ctx.request_id = request_id;
    ctx.headers = headers;
    ctx.cookies = cookies;
    ctx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cookies() {
        let mut h = HashMap::new();
        h.insert("cookie".to_string(), "a=b; c=d".to_string());
        let cookies = parse_cookies(&h);
        assert_eq!(cookies.get("a"), Some(&"b".to_string()));
        assert_eq!(cookies.get("c"), Some(&"d".to_string()));
    }

    #[test]
    fn test_parse_query_params() {
        let q = parse_query_params("/p?x=1&y=2");
        assert_eq!(q.get("x"), Some(&"1".to_string()));
        assert_eq!(q.get("y"), Some(&"2".to_string()));
    }

    #[test]
    fn test_parse_query_params_without_query() {
        assert!(parse_query_params("/p").is_empty());
    }
}
