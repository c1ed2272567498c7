//! WebSocket upgrade: who is this connection, and which room does it go in
//!
//! Resolves, from the HTTP upgrade request alone:
//! - the identity token (the `peerid` cookie, or a fresh one to hand back)
//! - the grouping key (client address, honouring `X-Forwarded-For`)
//! - the WebRTC capability flag (a `webrtc` marker in the request path)
//! - the raw user agent, for the device label

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::http::header::{COOKIE, SET_COOKIE, USER_AGENT};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tracing::{debug, warn};

use lanpair_core::{generate_peer_id, parse_peer_id, PEER_ID_COOKIE};

/// Header carrying the original client address behind a proxy
pub const FORWARDED_FOR: &str = "x-forwarded-for";

/// Path marker for clients able to do WebRTC
pub const RTC_PATH_MARKER: &str = "webrtc";

/// Everything the upgrade request tells us about a connection
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionIdentity {
    pub peer_id: String,
    pub group_key: String,
    pub rtc_supported: bool,
    pub user_agent: Option<String>,
    /// True when `peer_id` was minted for this connection
    pub issued: bool,
}

impl ConnectionIdentity {
    /// Resolve identity from an upgrade request received from `remote`
    pub fn resolve(request: &Request, remote: SocketAddr) -> Self {
        let headers = request.headers();

        let cookie_id = headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(peer_id_from_cookies);

        let (peer_id, issued) = match cookie_id {
            Some(id) => (id, false),
            None => (generate_peer_id(), true),
        };

        let forwarded = headers.get(FORWARDED_FOR).and_then(|v| v.to_str().ok());

        Self {
            peer_id,
            group_key: group_key(forwarded, remote.ip()),
            rtc_supported: request.uri().path().contains(RTC_PATH_MARKER),
            user_agent: headers
                .get(USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned),
            issued,
        }
    }

    /// Attach the identity cookie to the upgrade response when it was just minted
    pub fn apply(&self, mut response: Response, secure_cookie: bool) -> Response {
        if !self.issued {
            return response;
        }

        match HeaderValue::from_str(&set_cookie(&self.peer_id, secure_cookie)) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(e) => warn!("Could not encode identity cookie: {}", e),
        }
        response
    }
}

/// Find a valid identity token in a `Cookie` header value
pub fn peer_id_from_cookies(header: &str) -> Option<String> {
    header
        .split(';')
        .filter_map(|pair| pair.split_once('='))
        .filter(|(name, _)| name.trim() == PEER_ID_COOKIE)
        .find_map(|(_, value)| match parse_peer_id(value) {
            Ok(id) => Some(id),
            Err(e) => {
                debug!("Ignoring identity cookie: {}", e);
                None
            }
        })
}

/// `Set-Cookie` value handing a fresh token to the client
pub fn set_cookie(peer_id: &str, secure: bool) -> String {
    let mut cookie = format!("{}={}; SameSite=Strict", PEER_ID_COOKIE, peer_id);
    if secure {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Room selector for a client
///
/// The first `X-Forwarded-For` entry wins over the socket address.
pub fn group_key(forwarded_for: Option<&str>, remote: IpAddr) -> String {
    forwarded_for
        .and_then(|header| header.split(',').next())
        .map(str::trim)
        .filter(|first| !first.is_empty())
        .map(normalize_address)
        .unwrap_or_else(|| normalize_ip(remote).to_string())
}

/// Collapse IPv6 spellings of IPv4 addresses onto the IPv4 text form
pub fn normalize_address(addr: &str) -> String {
    match addr.parse::<IpAddr>() {
        Ok(ip) => normalize_ip(ip).to_string(),
        Err(_) => addr.to_string(),
    }
}

fn normalize_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) if v6.is_loopback() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
        IpAddr::V4(_) => ip,
    }
}
