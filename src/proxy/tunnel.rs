//! Byte relay shared by the CONNECT and SOCKS5 paths.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::proxy::filter::{FilterDecision, SharedFilter};
use crate::proxy::sni::{self, ClientHello};

/// Size of each read while waiting for the connection's first bytes.
const READ_CHUNK: usize = 8 * 1024;

/// How long a client may take to finish a ClientHello it has started.
pub const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

/// Relay bytes between an accepted client and an already connected target.
///
/// Whichever side speaks first decides the mode. When the target speaks first
/// (SSH, SMTP, ...) the bytes are relayed as is. When the client does and its
/// first bytes open a TLS handshake, the whole first record is read and the SNI
/// host name must pass the filter too, so a tunnel opened for an allowed host
/// cannot be pointed at a denied one. A hello that never completes or cannot be
/// parsed closes the tunnel.
pub async fn relay<C, T>(
    mut client: C,
    mut target: T,
    filter: &SharedFilter,
    requested_host: &str,
) -> std::io::Result<()>
where
    C: AsyncRead + AsyncWrite + Unpin,
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut opening = vec![0u8; READ_CHUNK];
    let mut greeting = vec![0u8; READ_CHUNK];

    tokio::select! {
        n = client.read(&mut opening) => {
            let n = n?;
            if n == 0 {
                return Ok(());
            }
            opening.truncate(n);
        }
        n = target.read(&mut greeting) => {
            let n = n?;
            if n == 0 {
                return Ok(());
            }
            client.write_all(&greeting[..n]).await?;
            tokio::io::copy_bidirectional(&mut client, &mut target).await?;
            return Ok(());
        }
    }

    let hello = match tokio::time::timeout(
        HELLO_TIMEOUT,
        read_first_record(&mut client, &mut opening),
    )
    .await
    {
        Ok(hello) => hello?,
        Err(_) => {
            tracing::debug!(
                "Closed tunnel to {}: TLS ClientHello not completed in time",
                requested_host
            );
            return Ok(());
        }
    };

    match hello {
        ClientHello::NotTls | ClientHello::Anonymous => {}
        ClientHello::ServerName(server_name) => {
            if filter.read().check(&server_name) == FilterDecision::Deny {
                tracing::debug!(
                    "Closed tunnel to {}: TLS server name {} is denied",
                    requested_host,
                    server_name
                );
                return Ok(());
            }
        }
        ClientHello::Incomplete { .. } | ClientHello::Malformed => {
            tracing::debug!(
                "Closed tunnel to {}: unreadable TLS ClientHello",
                requested_host
            );
            return Ok(());
        }
    }

    target.write_all(&opening).await?;
    tokio::io::copy_bidirectional(&mut client, &mut target).await?;
    Ok(())
}

/// Keep reading until the first TLS record is complete, the client stops
/// sending, or the record would exceed the largest one a client may send.
async fn read_first_record<C>(client: &mut C, buf: &mut Vec<u8>) -> std::io::Result<ClientHello>
where
    C: AsyncRead + Unpin,
{
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let hello = sni::inspect(buf);
        match hello {
            ClientHello::Incomplete { needed } if needed <= sni::MAX_RECORD_LEN => {
                let n = client.read(&mut chunk).await?;
                if n == 0 {
                    return Ok(hello);
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            other => return Ok(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::RwLock;
    use tokio::io::duplex;

    use super::*;
    use crate::config::NetworkPolicy;
    use crate::proxy::filter::DomainFilter;
    use crate::proxy::sni::tests::client_hello;

    fn shared(denied: &[&str]) -> SharedFilter {
        Arc::new(RwLock::new(DomainFilter::from_policy(&NetworkPolicy {
            allowed_domains: vec![],
            denied_domains: denied.iter().map(|s| s.to_string()).collect(),
        })))
    }

    #[tokio::test]
    async fn test_relay_forwards_allowed_bytes() {
        let (client, mut client_peer) = duplex(64 * 1024);
        let (target, mut target_peer) = duplex(64 * 1024);
        let filter = shared(&[]);

        let task = tokio::spawn(async move { relay(client, target, &filter, "ok.example").await });

        client_peer.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        target_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        drop(client_peer);
        drop(target_peer);
        let _ = task.await.unwrap();
    }

    #[tokio::test]
    async fn test_relay_closes_on_denied_sni() {
        let (client, mut client_peer) = duplex(64 * 1024);
        let (target, mut target_peer) = duplex(64 * 1024);
        let filter = shared(&["evil.example"]);

        let task = tokio::spawn(async move { relay(client, target, &filter, "ok.example").await });

        client_peer
            .write_all(&client_hello(Some("evil.example")))
            .await
            .unwrap();
        task.await.unwrap().unwrap();

        // the relay dropped the target without forwarding anything
        let mut buf = Vec::new();
        target_peer.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_relay_checks_a_hello_split_across_writes() {
        let (client, mut client_peer) = duplex(64 * 1024);
        let (target, mut target_peer) = duplex(64 * 1024);
        let filter = shared(&["evil.example"]);

        let task = tokio::spawn(async move { relay(client, target, &filter, "ok.example").await });

        let hello = client_hello(Some("evil.example"));
        client_peer.write_all(&hello[..10]).await.unwrap();
        tokio::task::yield_now().await;
        client_peer.write_all(&hello[10..]).await.unwrap();
        task.await.unwrap().unwrap();

        let mut buf = Vec::new();
        target_peer.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_relay_forwards_a_split_allowed_hello_whole() {
        let (client, mut client_peer) = duplex(64 * 1024);
        let (target, mut target_peer) = duplex(64 * 1024);
        let filter = shared(&["evil.example"]);

        let task = tokio::spawn(async move { relay(client, target, &filter, "ok.example").await });

        let hello = client_hello(Some("ok.example"));
        client_peer.write_all(&hello[..3]).await.unwrap();
        tokio::task::yield_now().await;
        client_peer.write_all(&hello[3..]).await.unwrap();

        let mut buf = vec![0u8; hello.len()];
        target_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, hello);

        drop(client_peer);
        drop(target_peer);
        let _ = task.await.unwrap();
    }

    #[tokio::test]
    async fn test_relay_closes_on_truncated_hello() {
        let (client, mut client_peer) = duplex(64 * 1024);
        let (target, mut target_peer) = duplex(64 * 1024);
        let filter = shared(&[]);

        let task = tokio::spawn(async move { relay(client, target, &filter, "ok.example").await });

        let hello = client_hello(Some("ok.example"));
        client_peer.write_all(&hello[..20]).await.unwrap();
        client_peer.shutdown().await.unwrap();
        task.await.unwrap().unwrap();

        let mut buf = Vec::new();
        target_peer.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_relay_passes_server_greeting_first() {
        let (client, mut client_peer) = duplex(64 * 1024);
        let (target, mut target_peer) = duplex(64 * 1024);
        let filter = shared(&[]);

        let task = tokio::spawn(async move { relay(client, target, &filter, "ok.example").await });

        let banner = b"SSH-2.0-OpenSSH_9.6\r\n";
        target_peer.write_all(banner).await.unwrap();
        let mut buf = vec![0u8; banner.len()];
        tokio::time::timeout(Duration::from_secs(2), client_peer.read_exact(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf, banner);

        client_peer.write_all(b"SSH-2.0-client\r\n").await.unwrap();
        let mut reply = [0u8; 16];
        target_peer.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"SSH-2.0-client\r\n");

        drop(client_peer);
        drop(target_peer);
        let _ = task.await.unwrap();
    }
}
