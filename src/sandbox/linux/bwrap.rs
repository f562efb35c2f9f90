//! Bubblewrap command generation for Linux sandbox.

use std::path::Path;

use crate::error::SandboxError;
use crate::sandbox::linux::filesystem::directive_to_bwrap_args;
use crate::sandbox::{CommandMode, NetworkRoute, WrapRequest};
use crate::utils::{join_args, quote};

/// In-sandbox port of the HTTP proxy bridge.
pub const HTTP_BRIDGE_PORT: u16 = 3128;

/// In-sandbox port of the SOCKS5 proxy bridge.
pub const SOCKS_BRIDGE_PORT: u16 = 1080;

/// Replaced by an empty tmpfs in every sandbox.
const PRIVATE_TMP: &str = "/tmp";

/// `$0` of the inner script.
const SCRIPT_NAME: &str = "srt";

/// Command that forwards a loopback TCP port inside the sandbox to a host Unix socket.
pub fn socat_bridge_command(socat: &str, tcp_port: u16, socket_path: &Path) -> String {
    format!(
        "{} TCP-LISTEN:{},bind=127.0.0.1,fork,reuseaddr {}",
        quote(socat),
        tcp_port,
        quote(&format!("UNIX-CONNECT:{}", socket_path.display()))
    )
}

/// Proxy environment variables pointing at the in-sandbox bridges.
pub fn generate_proxy_env(http_port: u16, socks_port: u16) -> Vec<(String, String)> {
    let http_proxy = format!("http://localhost:{}", http_port);
    let socks_proxy = format!("socks5://localhost:{}", socks_port);

    vec![
        ("http_proxy".to_string(), http_proxy.clone()),
        ("HTTP_PROXY".to_string(), http_proxy.clone()),
        ("https_proxy".to_string(), http_proxy.clone()),
        ("HTTPS_PROXY".to_string(), http_proxy),
        ("ALL_PROXY".to_string(), socks_proxy.clone()),
        ("all_proxy".to_string(), socks_proxy),
    ]
}

/// Build the script run inside bubblewrap: bridges, proxy environment, then
/// the seccomp helper exec-ing the target passed as positional parameters.
fn build_inner_script(request: &WrapRequest<'_>, socat: &str) -> String {
    let mut lines = Vec::new();

    if let NetworkRoute::Proxied {
        http_socket,
        socks_socket,
        ..
    } = request.network
    {
        for (port, socket) in [
            (HTTP_BRIDGE_PORT, http_socket),
            (SOCKS_BRIDGE_PORT, socks_socket),
        ] {
            lines.push(format!(
                "{} >/dev/null 2>&1 &",
                socat_bridge_command(socat, port, socket)
            ));
        }
        // Let the bridges bind before the target connects
        lines.push("sleep 0.1".to_string());

        let exports = generate_proxy_env(HTTP_BRIDGE_PORT, SOCKS_BRIDGE_PORT)
            .into_iter()
            .map(|(key, value)| format!("{}={}", key, quote(&value)))
            .collect::<Vec<_>>()
            .join(" ");
        lines.push(format!("export {}", exports));
    }

    match request.filter {
        Some(artifact) => lines.push(format!(
            "exec {} {} \"$@\"",
            quote(&artifact.apply_helper_path.display().to_string()),
            quote(&artifact.bpf_path.display().to_string())
        )),
        None => lines.push("exec \"$@\"".to_string()),
    }

    lines.join("\n")
}

/// Generate the complete wrapped command string.
pub fn generate_bwrap_command(
    request: &WrapRequest<'_>,
    bwrap: &str,
    socat: &str,
) -> Result<String, SandboxError> {
    if request.command.trim().is_empty() {
        return Err(SandboxError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "empty command",
        )));
    }

    let mut args: Vec<String> = vec![
        bwrap.to_string(),
        "--new-session".to_string(),
        "--die-with-parent".to_string(),
        "--unshare-net".to_string(),
        "--ro-bind".to_string(),
        "/".to_string(),
        "/".to_string(),
        "--dev".to_string(),
        "/dev".to_string(),
        "--proc".to_string(),
        "/proc".to_string(),
        "--tmpfs".to_string(),
        PRIVATE_TMP.to_string(),
    ];

    // A working directory under the host /tmp stays visible unless the plan masks it
    let cwd = request.cwd.display().to_string();
    if request.cwd.starts_with(PRIVATE_TMP) && request.cwd != Path::new(PRIVATE_TMP) {
        args.extend(["--ro-bind".to_string(), cwd.clone(), cwd.clone()]);
    }

    for directive in &request.plan.directives {
        args.extend(directive_to_bwrap_args(directive));
    }

    // The proxy sockets usually live under /tmp, which is private above
    if let NetworkRoute::Proxied { socket_dir, .. } = request.network {
        let dir = socket_dir.display().to_string();
        args.extend(["--bind".to_string(), dir.clone(), dir]);
    }

    // Generated bytecode lives under /tmp; either file may also sit below a mask
    if let Some(artifact) = request.filter {
        for path in [&artifact.bpf_path, &artifact.apply_helper_path] {
            let path = path.display().to_string();
            args.extend(["--ro-bind".to_string(), path.clone(), path]);
        }
    }

    args.push("--chdir".to_string());
    args.push(cwd);

    args.push("--".to_string());
    args.push(request.shell.to_string());
    args.push("-c".to_string());
    args.push(build_inner_script(request, socat));
    args.push(SCRIPT_NAME.to_string());

    let tail = match request.mode {
        CommandMode::Quoted => join_args([request.shell, "-c", request.command]),
        CommandMode::Unescaped => request.command.to_string(),
    };

    Ok(format!("{} {}", join_args(&args), tail))
}
