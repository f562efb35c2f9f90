//! Domain-filtering proxy process supervised by `srt`.
//!
//! Prints a ready message on stdout, then takes policy updates as JSON lines on
//! stdin. Exits on a shutdown request or when stdin closes.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;

use policy_sandbox::proxy::{run_proxy_server, ProxyServerOptions};
use policy_sandbox::utils::init_debug_logging;

#[derive(Parser, Debug)]
#[command(name = "srt-proxy")]
#[command(about = "HTTP and SOCKS5 proxy enforcing domain allow/deny lists")]
struct Args {
    /// Also accept HTTP proxy clients on this Unix socket
    #[arg(long = "http-socket")]
    http_socket: Option<PathBuf>,

    /// Also accept SOCKS5 clients on this Unix socket
    #[arg(long = "socks-socket")]
    socks_socket: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_debug_logging(false);

    run_proxy_server(ProxyServerOptions {
        http_socket: args.http_socket,
        socks_socket: args.socks_socket,
    })
    .await?;

    Ok(())
}
