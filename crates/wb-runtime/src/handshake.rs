//! WebSocket upgrade inspection: routing, origin policy and credentials.

use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

/// Query parameter, cookie name and bearer scheme accepted as credentials.
const TOKEN_PARAM: &str = "token";
const TOKEN_COOKIE: &str = "wb_token";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// JSON-RPC requests.
    Rpc,
    /// One tail session for the decoded root-relative path.
    Tail(String),
    Unknown(String),
}

/// What the handshake callback learned about the connection.
#[derive(Debug, Clone)]
pub struct Handshake {
    pub route: Route,
    pub credential: Option<String>,
}

pub fn parse_route(path: &str) -> Route {
    if path == "/rpc" || path == "/rpc/" {
        return Route::Rpc;
    }
    if path == "/tail" {
        return Route::Tail(String::new());
    }
    if let Some(rest) = path.strip_prefix("/tail/") {
        return match urlencoding::decode(rest) {
            Ok(decoded) => Route::Tail(decoded.into_owned()),
            Err(_) => Route::Unknown(path.to_string()),
        };
    }
    Route::Unknown(path.to_string())
}

/// Token from `?token=`, `Authorization: Bearer`, or the `wb_token` cookie,
/// in that order.
pub fn extract_credential(req: &Request) -> Option<String> {
    if let Some(query) = req.uri().query() {
        for pair in query.split('&') {
            if let Some((key, value)) = pair.split_once('=') {
                if key == TOKEN_PARAM {
                    // Query strings are form-encoded: `+` is a space.
                    let value = value.replace('+', " ");
                    return urlencoding::decode(&value).ok().map(|v| v.into_owned());
                }
            }
        }
    }

    if let Some(value) = header(req, "authorization") {
        if let Some(token) = value.strip_prefix("Bearer ") {
            return Some(token.trim().to_string());
        }
    }

    header(req, "cookie").and_then(|cookies| {
        cookies.split(';').find_map(|c| {
            let (name, value) = c.trim().split_once('=')?;
            (name == TOKEN_COOKIE).then(|| value.to_string())
        })
    })
}

/// Browser connections must come from the page this server served, or from
/// an explicitly allowed origin. Clients that send no `Origin` (curl, native
/// tools) and `null` origins (file:// pages) are allowed; they still need the
/// token.
pub fn origin_allowed(req: &Request, allowed: &[String]) -> bool {
    let Some(origin) = header(req, "origin") else {
        return true;
    };
    if origin == "null" || allowed.iter().any(|a| a.eq_ignore_ascii_case(origin)) {
        return true;
    }
    let origin_host = origin.split_once("://").map_or(origin, |(_, host)| host);
    match header(req, "host") {
        Some(host) => origin_host.trim_end_matches('/').eq_ignore_ascii_case(host),
        None => false,
    }
}

/// Inspect the upgrade request, recording what was learned into `captured`.
pub fn inspect(
    req: &Request,
    resp: Response,
    allowed_origins: &[String],
    captured: &mut Option<Handshake>,
) -> Result<Response, ErrorResponse> {
    if !origin_allowed(req, allowed_origins) {
        tracing::warn!(
            origin = header(req, "origin").unwrap_or(""),
            "ws: rejected connection from disallowed origin"
        );
        let mut err = ErrorResponse::new(Some("Origin not allowed".into()));
        *err.status_mut() = http::StatusCode::FORBIDDEN;
        return Err(err);
    }
    *captured = Some(Handshake {
        route: parse_route(req.uri().path()),
        credential: extract_credential(req),
    });
    Ok(resp)
}

fn header<'a>(req: &'a Request, name: &str) -> Option<&'a str> {
    req.headers().get(name).and_then(|v| v.to_str().ok())
}
