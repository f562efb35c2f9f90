//! Network side of the manager: the proxy and the route into the sandbox.

use std::sync::Arc;

use crate::config::NetworkPolicy;
use crate::error::SandboxError;
use crate::proxy::{ProxyHandle, ProxyLaunch};
use crate::sandbox::NetworkRoute;

/// Start the filtering proxy with `policy` installed.
pub(crate) async fn start_proxy(
    launch: &ProxyLaunch,
    policy: &NetworkPolicy,
) -> Result<Arc<ProxyHandle>, SandboxError> {
    let proxy = ProxyHandle::start(launch, policy).await?;
    tracing::info!(
        "Proxy started (pid {}, HTTP: {}, SOCKS5: {})",
        proxy.pid(),
        proxy.http_addr(),
        proxy.socks_addr()
    );
    Ok(Arc::new(proxy))
}

/// Route wrapped commands take to the network.
///
/// Anything other than a live proxy revokes network access.
pub(crate) fn network_route(proxy: Option<&ProxyHandle>) -> NetworkRoute {
    match proxy {
        Some(proxy) if proxy.is_alive() => match proxy.socket_dir() {
            Some(socket_dir) => NetworkRoute::Proxied {
                socket_dir,
                http_socket: proxy.http_socket().to_path_buf(),
                socks_socket: proxy.socks_socket().to_path_buf(),
            },
            None => NetworkRoute::Revoked,
        },
        _ => NetworkRoute::Revoked,
    }
}

/// Network policy actually in force.
pub(crate) fn effective_network_policy(
    proxy: Option<&ProxyHandle>,
    stored: &NetworkPolicy,
) -> NetworkPolicy {
    match proxy {
        Some(proxy) if proxy.is_alive() => stored.clone(),
        _ => NetworkPolicy::deny_all(),
    }
}
