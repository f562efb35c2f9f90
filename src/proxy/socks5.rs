//! SOCKS5 proxy (RFC 1928), no-auth CONNECT only.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::proxy::filter::{FilterDecision, SharedFilter};
use crate::proxy::tunnel::relay;

const SOCKS_VERSION: u8 = 0x05;
const AUTH_NONE: u8 = 0x00;
const AUTH_NO_ACCEPTABLE: u8 = 0xFF;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;
pub const REP_SUCCESS: u8 = 0x00;
pub const REP_GENERAL_FAILURE: u8 = 0x01;
pub const REP_CONNECTION_NOT_ALLOWED: u8 = 0x02;
pub const REP_HOST_UNREACHABLE: u8 = 0x04;
pub const REP_COMMAND_NOT_SUPPORTED: u8 = 0x07;
pub const REP_ADDRESS_NOT_SUPPORTED: u8 = 0x08;

/// Handle a SOCKS5 client connection.
pub async fn handle_client<S>(
    mut stream: S,
    filter: SharedFilter,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await?;
    if header[0] != SOCKS_VERSION {
        return Err("Invalid SOCKS version".into());
    }

    let mut methods = vec![0u8; header[1] as usize];
    stream.read_exact(&mut methods).await?;
    if !methods.contains(&AUTH_NONE) {
        stream.write_all(&[SOCKS_VERSION, AUTH_NO_ACCEPTABLE]).await?;
        return Err("No supported authentication method".into());
    }
    stream.write_all(&[SOCKS_VERSION, AUTH_NONE]).await?;

    // VER CMD RSV ATYP
    let mut request = [0u8; 4];
    stream.read_exact(&mut request).await?;
    if request[0] != SOCKS_VERSION {
        return Err("Invalid SOCKS version in request".into());
    }

    if request[1] != CMD_CONNECT {
        send_reply(&mut stream, REP_COMMAND_NOT_SUPPORTED, None).await?;
        return Err("Only CONNECT command is supported".into());
    }

    let host = match request[3] {
        ATYP_IPV4 => {
            let mut addr = [0u8; 4];
            stream.read_exact(&mut addr).await?;
            Ipv4Addr::from(addr).to_string()
        }
        ATYP_DOMAIN => {
            let len = stream.read_u8().await? as usize;
            let mut domain = vec![0u8; len];
            stream.read_exact(&mut domain).await?;
            String::from_utf8_lossy(&domain).to_string()
        }
        ATYP_IPV6 => {
            let mut addr = [0u8; 16];
            stream.read_exact(&mut addr).await?;
            Ipv6Addr::from(addr).to_string()
        }
        _ => {
            send_reply(&mut stream, REP_ADDRESS_NOT_SUPPORTED, None).await?;
            return Err("Unsupported address type".into());
        }
    };
    let port = stream.read_u16().await?;

    let decision = filter.read().check(&host);
    if decision == FilterDecision::Deny {
        tracing::debug!("SOCKS5 denied connection to {}:{}", host, port);
        send_reply(&mut stream, REP_CONNECTION_NOT_ALLOWED, None).await?;
        return Ok(());
    }

    let target = match TcpStream::connect((host.as_str(), port)).await {
        Ok(s) => s,
        Err(e) => {
            tracing::debug!("SOCKS5 failed to connect to {}:{}: {}", host, port, e);
            send_reply(&mut stream, REP_HOST_UNREACHABLE, None).await?;
            return Ok(());
        }
    };

    tracing::debug!("SOCKS5 CONNECT {}:{}", host, port);
    send_reply(&mut stream, REP_SUCCESS, Some(target.local_addr()?)).await?;

    relay(stream, target, &filter, &host).await?;
    Ok(())
}

/// Send a SOCKS5 reply; an absent bind address is sent as 0.0.0.0:0.
async fn send_reply<W>(
    stream: &mut W,
    rep: u8,
    bind: Option<SocketAddr>,
) -> Result<(), std::io::Error>
where
    W: AsyncWrite + Unpin,
{
    let bind = bind.unwrap_or_else(|| SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)));
    let mut reply = vec![SOCKS_VERSION, rep, 0x00];

    match bind {
        SocketAddr::V4(addr) => {
            reply.push(ATYP_IPV4);
            reply.extend_from_slice(&addr.ip().octets());
        }
        SocketAddr::V6(addr) => {
            reply.push(ATYP_IPV6);
            reply.extend_from_slice(&addr.ip().octets());
        }
    }
    reply.extend_from_slice(&bind.port().to_be_bytes());

    stream.write_all(&reply).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::RwLock;
    use tokio::io::duplex;

    use super::*;
    use crate::config::NetworkPolicy;
    use crate::proxy::filter::DomainFilter;

    #[tokio::test]
    async fn test_denied_domain_gets_not_allowed_reply() {
        let filter = Arc::new(RwLock::new(DomainFilter::from_policy(&NetworkPolicy {
            allowed_domains: vec![],
            denied_domains: vec!["evil.example".to_string()],
        })));
        let (server, mut client) = duplex(1024);
        let task = tokio::spawn(async move { handle_client(server, filter).await });

        client.write_all(&[SOCKS_VERSION, 1, AUTH_NONE]).await.unwrap();
        let mut method = [0u8; 2];
        client.read_exact(&mut method).await.unwrap();
        assert_eq!(method, [SOCKS_VERSION, AUTH_NONE]);

        let domain = b"evil.example";
        let mut request = vec![SOCKS_VERSION, CMD_CONNECT, 0x00, ATYP_DOMAIN, domain.len() as u8];
        request.extend_from_slice(domain);
        request.extend_from_slice(&443u16.to_be_bytes());
        client.write_all(&request).await.unwrap();

        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[0], SOCKS_VERSION);
        assert_eq!(reply[1], REP_CONNECTION_NOT_ALLOWED);
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_rejects_non_connect_command() {
        let filter = Arc::new(RwLock::new(DomainFilter::allow_all()));
        let (server, mut client) = duplex(1024);
        let task = tokio::spawn(async move { handle_client(server, filter).await });

        client.write_all(&[SOCKS_VERSION, 1, AUTH_NONE]).await.unwrap();
        let mut method = [0u8; 2];
        client.read_exact(&mut method).await.unwrap();

        // BIND
        client
            .write_all(&[SOCKS_VERSION, 0x02, 0x00, ATYP_IPV4, 127, 0, 0, 1, 0, 80])
            .await
            .unwrap();
        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[1], REP_COMMAND_NOT_SUPPORTED);
        assert!(task.await.unwrap().is_err());
    }
}
