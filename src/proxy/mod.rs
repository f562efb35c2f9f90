//! Domain-filtering proxy: the process itself and its supervisor.

pub mod control;
pub mod filter;
pub mod http;
pub mod server;
pub mod sni;
pub mod socks5;
pub mod supervisor;
pub mod tunnel;

pub use control::{ControlEvent, ControlRequest};
pub use filter::{DomainFilter, FilterDecision, SharedFilter};
pub use server::{run as run_proxy_server, ProxyServerOptions};
pub use supervisor::{default_proxy_program, ProxyHandle, ProxyLaunch, ProxyStatus};
