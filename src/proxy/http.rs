//! HTTP/HTTPS proxy with CONNECT tunneling.

use bytes::Bytes;
use http_body_util::{combinators::BoxBody, BodyExt, Empty, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::proxy::filter::{FilterDecision, SharedFilter};
use crate::proxy::tunnel::relay;

type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Serve one client connection, which may carry several requests.
pub async fn handle_connection<S>(
    stream: S,
    filter: SharedFilter,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);

    http1::Builder::new()
        .preserve_header_case(true)
        .title_case_headers(true)
        .serve_connection(
            io,
            service_fn(move |req| {
                let filter = filter.clone();
                async move { handle_request(req, filter).await }
            }),
        )
        .with_upgrades()
        .await?;

    Ok(())
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    filter: SharedFilter,
) -> Result<Response<ProxyBody>, hyper::Error> {
    if req.method() == Method::CONNECT {
        handle_connect(req, filter).await
    } else {
        handle_http(req, filter).await
    }
}

/// Handle CONNECT requests (HTTPS tunneling).
async fn handle_connect(
    req: Request<hyper::body::Incoming>,
    filter: SharedFilter,
) -> Result<Response<ProxyBody>, hyper::Error> {
    let host = req.uri().host().unwrap_or_default().to_string();
    let port = req.uri().port_u16().unwrap_or(443);

    let decision = filter.read().check(&host);
    if decision == FilterDecision::Deny {
        tracing::debug!("Denied CONNECT to {}:{}", host, port);
        return Ok(status_response(
            StatusCode::FORBIDDEN,
            full_body("Access denied by sandbox policy"),
        ));
    }

    let target = match TcpStream::connect((host.as_str(), port)).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::debug!("Failed to connect to {}:{}: {}", host, port, e);
            return Ok(status_response(
                StatusCode::BAD_GATEWAY,
                full_body("Failed to connect to target"),
            ));
        }
    };

    tracing::debug!("CONNECT {}:{}", host, port);

    tokio::task::spawn(async move {
        match hyper::upgrade::on(req).await {
            Ok(upgraded) => {
                if let Err(e) = relay(TokioIo::new(upgraded), target, &filter, &host).await {
                    tracing::debug!("Tunnel error: {}", e);
                }
            }
            Err(e) => {
                tracing::debug!("Upgrade error: {}", e);
            }
        }
    });

    Ok(Response::new(empty_body()))
}

/// Hostname a plain HTTP request is addressed to: the absolute-form URI host,
/// falling back to the Host header.
fn request_host<B>(req: &Request<B>) -> String {
    req.uri()
        .host()
        .or_else(|| {
            req.headers()
                .get(hyper::header::HOST)
                .and_then(|h| h.to_str().ok())
                .map(|h| h.split(':').next().unwrap_or(h))
        })
        .unwrap_or_default()
        .to_string()
}

/// Handle plain HTTP requests.
async fn handle_http(
    req: Request<hyper::body::Incoming>,
    filter: SharedFilter,
) -> Result<Response<ProxyBody>, hyper::Error> {
    let host = request_host(&req);
    let port = req.uri().port_u16().unwrap_or(80);

    let decision = filter.read().check(&host);
    if decision == FilterDecision::Deny {
        tracing::debug!("Denied HTTP {} to {}:{}", req.method(), host, port);
        return Ok(status_response(
            StatusCode::FORBIDDEN,
            full_body("Access denied by sandbox policy"),
        ));
    }

    tracing::debug!("HTTP {} {}:{}", req.method(), host, port);
    forward_http(req, &host, port).await
}

/// Forward an HTTP request to its origin.
async fn forward_http(
    req: Request<hyper::body::Incoming>,
    host: &str,
    port: u16,
) -> Result<Response<ProxyBody>, hyper::Error> {
    let stream = match TcpStream::connect((host, port)).await {
        Ok(s) => s,
        Err(e) => {
            tracing::debug!("Failed to connect to {}:{}: {}", host, port, e);
            return Ok(status_response(
                StatusCode::BAD_GATEWAY,
                full_body("Failed to connect to target"),
            ));
        }
    };

    let (mut sender, conn) = match hyper::client::conn::http1::handshake(TokioIo::new(stream)).await
    {
        Ok(c) => c,
        Err(e) => {
            tracing::debug!("Handshake error: {}", e);
            return Ok(status_response(
                StatusCode::BAD_GATEWAY,
                full_body("Handshake failed"),
            ));
        }
    };

    tokio::spawn(async move {
        if let Err(e) = conn.await {
            tracing::debug!("Connection error: {}", e);
        }
    });

    match sender.send_request(req).await {
        Ok(resp) => Ok(resp.map(|b| b.boxed())),
        Err(e) => {
            tracing::debug!("Request error: {}", e);
            Ok(status_response(
                StatusCode::BAD_GATEWAY,
                full_body("Request failed"),
            ))
        }
    }
}

fn status_response(status: StatusCode, body: ProxyBody) -> Response<ProxyBody> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
}

fn empty_body() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed()
}

fn full_body(s: &str) -> ProxyBody {
    Full::new(Bytes::from(s.to_string()))
        .map_err(|never| match never {})
        .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_host_from_uri_and_header() {
        let req = Request::get("http://api.example.com:8080/path")
            .body(())
            .unwrap();
        assert_eq!(request_host(&req), "api.example.com");

        let req = Request::get("/path")
            .header("Host", "origin.example:8080")
            .body(())
            .unwrap();
        assert_eq!(request_host(&req), "origin.example");

        let req = Request::get("/path").body(()).unwrap();
        assert_eq!(request_host(&req), "");
    }
}
