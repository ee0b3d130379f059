use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::header::USER_AGENT;
use axum::http::request::Parts;
use axum::http::{Extensions, HeaderMap};
use uuid::Uuid;

use crate::engine::ProtocolError;
use crate::registry::RequestMetadata;
use crate::server::AppState;

/// Header carrying the identity token, in both directions
pub const IDENTITY_HEADER: &str = "uuid";

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Identity token taken from the `uuid` header
///
/// Anything that is not canonical hyphenated UUID text is rejected with
/// [`ProtocolError::MalformedIdentity`] before the registry is consulted.
#[derive(Debug, Clone, Copy)]
pub struct IdentityToken(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for IdentityToken
where
    S: Send + Sync,
{
    type Rejection = ProtocolError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(IDENTITY_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or(ProtocolError::MalformedIdentity)?;

        parse_identity_token(value)
            .map(Self)
            .ok_or(ProtocolError::MalformedIdentity)
    }
}

/// Parse a token in canonical `8-4-4-4-12` form, hex digits in either case
pub fn parse_identity_token(value: &str) -> Option<Uuid> {
    let bytes = value.as_bytes();
    if bytes.len() != 36 {
        return None;
    }

    let canonical = bytes.iter().enumerate().all(|(i, b)| match i {
        8 | 13 | 18 | 23 => *b == b'-',
        _ => b.is_ascii_hexdigit(),
    });
    if !canonical {
        return None;
    }

    Uuid::parse_str(value).ok()
}

/// Source address and user agent of the current request, captured verbatim
#[derive(Debug, Clone, Default)]
pub struct ClientMetadata(pub RequestMetadata);

#[async_trait]
impl<S> FromRequestParts<S> for ClientMetadata
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let trust_proxy = parts
            .extensions
            .get::<Arc<AppState>>()
            .map_or(false, |state| state.config.security.trust_proxy);

        let peer = peer_address(&parts.extensions);
        let source_address =
            client_address(peer, &parts.headers, trust_proxy).map(|ip| ip.to_string());
        let user_agent = parts
            .headers
            .get(USER_AGENT)
            .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned());

        Ok(Self(RequestMetadata {
            source_address,
            user_agent,
        }))
    }
}

/// TCP peer recorded by `into_make_service_with_connect_info`
pub fn peer_address(extensions: &Extensions) -> Option<SocketAddr> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

/// Resolve the address of the client behind any trusted proxies
///
/// The peer is the answer unless proxy trust is on and the peer is a
/// loopback, link-local or unique-local address. In that case
/// `X-Forwarded-For` is walked from the right and the first hop that is not
/// itself such an address wins.
pub fn client_address(
    peer: Option<SocketAddr>,
    headers: &HeaderMap,
    trust_proxy: bool,
) -> Option<IpAddr> {
    let mut address = peer?.ip();

    if !trust_proxy || !is_trusted_proxy(address) {
        return Some(address);
    }

    let hops: Vec<&str> = headers
        .get_all(X_FORWARDED_FOR)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .collect();

    for hop in hops.into_iter().rev() {
        let Ok(ip) = hop.parse::<IpAddr>() else {
            break;
        };

        address = ip;
        if !is_trusted_proxy(ip) {
            break;
        }
    }

    Some(address)
}

fn is_trusted_proxy(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_link_local() || v4.is_private(),
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_trusted_proxy(IpAddr::V4(v4));
            }

            let first = v6.segments()[0];
            v6.is_loopback() || (first & 0xffc0) == 0xfe80 || (first & 0xfe00) == 0xfc00
        }
    }
}
