use std::net::{IpAddr, SocketAddr};

use axum::{
    extract::{ConnectInfo, State},
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};

use crate::config::AllowedIps;
use crate::error::AppError;

const FORWARDED_FOR: &str = "x-forwarded-for";

/// Who may deliver payment callbacks.
///
/// A depth of 0 trusts only the TCP peer. A depth of `n` means `n` proxies
/// sit in front of the service, each appending to `X-Forwarded-For`, so the
/// caller is the `n`-th entry from the right.
#[derive(Clone, Debug)]
pub struct CallbackSourcePolicy {
    allowed: AllowedIps,
    trusted_proxy_depth: usize,
}

impl CallbackSourcePolicy {
    pub fn new(allowed: AllowedIps, trusted_proxy_depth: usize) -> Self {
        Self {
            allowed,
            trusted_proxy_depth,
        }
    }

    /// Anyone may call back; used in sandbox setups.
    pub fn open() -> Self {
        Self::new(AllowedIps::Any, 0)
    }

    pub fn caller(&self, headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<IpAddr> {
        match self.trusted_proxy_depth {
            0 => peer.map(|addr| addr.ip()),
            depth => forwarded_caller(headers, depth),
        }
    }

    pub fn admits(&self, caller: Option<IpAddr>) -> bool {
        match (&self.allowed, caller) {
            (AllowedIps::Any, _) => true,
            (AllowedIps::Cidrs(nets), Some(ip)) => nets.iter().any(|net| net.contains(&ip)),
            (AllowedIps::Cidrs(_), None) => false,
        }
    }
}

/// Route layer for the callback endpoint. Rejections use the regular JSON
/// error body so the gateway's logs show why.
pub async fn guard_callback_source<B>(
    State(policy): State<CallbackSourcePolicy>,
    req: Request<B>,
    next: Next<B>,
) -> Result<Response, AppError> {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let caller = policy.caller(req.headers(), peer);

    if !policy.admits(caller) {
        tracing::warn!(
            caller = ?caller,
            peer = ?peer,
            proxy_depth = policy.trusted_proxy_depth,
            "rejected payment callback from unlisted source"
        );
        let who = caller.map_or_else(|| "unknown source".to_string(), |ip| ip.to_string());
        return Err(AppError::Forbidden(format!(
            "callbacks are not accepted from {}",
            who
        )));
    }

    Ok(next.run(req).await)
}

fn forwarded_caller(headers: &HeaderMap, depth: usize) -> Option<IpAddr> {
    let raw = headers.get(FORWARDED_FOR)?.to_str().ok()?;
    let hops: Vec<IpAddr> = raw.split(',').filter_map(parse_hop).collect();
    let index = hops.len().checked_sub(depth)?;
    hops.get(index).copied()
}

// Proxies sometimes append the port as well.
fn parse_hop(entry: &str) -> Option<IpAddr> {
    let entry = entry.trim();
    entry
        .parse::<IpAddr>()
        .ok()
        .or_else(|| entry.parse::<SocketAddr>().ok().map(|addr| addr.ip()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn forwarded(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(FORWARDED_FOR, HeaderValue::from_static(value));
        headers
    }

    fn safaricom_only(depth: usize) -> CallbackSourcePolicy {
        CallbackSourcePolicy::new(
            AllowedIps::Cidrs(vec!["196.201.214.0/24".parse().unwrap()]),
            depth,
        )
    }

    #[test]
    fn depth_counts_hops_from_the_right() {
        let headers = forwarded("10.9.9.9, 196.201.214.200, 172.16.0.4");

        assert_eq!(
            safaricom_only(1).caller(&headers, None),
            Some(IpAddr::from([172, 16, 0, 4]))
        );
        assert_eq!(
            safaricom_only(2).caller(&headers, None),
            Some(IpAddr::from([196, 201, 214, 200]))
        );
        assert_eq!(safaricom_only(4).caller(&headers, None), None);
    }

    #[test]
    fn hop_with_port_is_accepted() {
        let headers = forwarded("196.201.214.200:52110");
        assert_eq!(
            safaricom_only(1).caller(&headers, None),
            Some(IpAddr::from([196, 201, 214, 200]))
        );
    }

    #[test]
    fn peer_wins_when_no_proxy_is_trusted() {
        let headers = forwarded("196.201.214.200");
        let peer = SocketAddr::from(([127, 0, 0, 1], 40000));

        let policy = safaricom_only(0);
        let caller = policy.caller(&headers, Some(peer));
        assert_eq!(caller, Some(IpAddr::from([127, 0, 0, 1])));
        assert!(!policy.admits(caller));
    }

    #[test]
    fn unresolved_caller_is_only_admitted_by_open_policy() {
        assert!(!safaricom_only(1).admits(None));
        assert!(CallbackSourcePolicy::open().admits(None));
    }
}
