//! Supervision of the filtering proxy process.
//!
//! The manager never shares memory with the proxy. A [`ProxyHandle`] owns the
//! child's stdin/stdout pair as the control channel and a watcher task that
//! notices when the process goes away.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::NetworkPolicy;
use crate::error::SandboxError;
use crate::proxy::control::{encode_line, ControlEvent, ControlRequest};
use crate::utils::{is_debug_enabled, SRT_DEBUG_ENV};

/// Name of the proxy binary.
pub const PROXY_PROGRAM_NAME: &str = "srt-proxy";

/// Default time allowed for the proxy to report readiness.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Time allowed for a control request to be acknowledged.
const CONTROL_TIMEOUT: Duration = Duration::from_secs(5);

/// Time the proxy gets to exit after SIGTERM before it is killed.
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Liveness of the proxy process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyStatus {
    Running,
    /// Exited without being asked to. Network access is revoked.
    Crashed,
    Stopped,
}

/// How to launch the proxy.
#[derive(Debug, Clone)]
pub struct ProxyLaunch {
    /// Path to the `srt-proxy` binary.
    pub program: PathBuf,
    /// Bound on waiting for the ready message and the first policy ack.
    pub ready_timeout: Duration,
}

impl Default for ProxyLaunch {
    fn default() -> Self {
        Self {
            program: default_proxy_program(),
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }
}

/// Locate `srt-proxy` next to the current executable (or one level up, which
/// covers test harnesses under `target/*/deps`), falling back to `PATH`.
pub fn default_proxy_program() -> PathBuf {
    if let Ok(exe) = std::env::current_exe() {
        for dir in exe.ancestors().skip(1).take(2) {
            let candidate = dir.join(PROXY_PROGRAM_NAME);
            if candidate.is_file() {
                return candidate;
            }
        }
    }
    PathBuf::from(PROXY_PROGRAM_NAME)
}

struct ControlChannel {
    stdin: Option<ChildStdin>,
    events: Lines<BufReader<ChildStdout>>,
    generation: u64,
}

impl ControlChannel {
    async fn send(&mut self, request: &ControlRequest) -> Result<(), SandboxError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| SandboxError::ProxyControl("control channel closed".to_string()))?;
        let line = encode_line(request).map_err(|e| SandboxError::ProxyControl(e.to_string()))?;
        stdin.write_all(line.as_bytes()).await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<ControlEvent>, SandboxError> {
        loop {
            let Some(line) = self.events.next_line().await? else {
                return Ok(None);
            };
            match serde_json::from_str::<ControlEvent>(&line) {
                Ok(event) => return Ok(Some(event)),
                Err(e) => tracing::debug!("Ignoring unexpected proxy output {:?}: {}", line, e),
            }
        }
    }

    async fn wait_for_ack(&mut self, generation: u64) -> Result<(), SandboxError> {
        loop {
            match self.next_event().await? {
                Some(ControlEvent::Ack { generation: acked }) if acked == generation => {
                    return Ok(())
                }
                Some(ControlEvent::Error { message }) => {
                    return Err(SandboxError::ProxyControl(message))
                }
                Some(other) => tracing::debug!("Ignoring proxy event {:?}", other),
                None => return Err(SandboxError::ProxyCrashed),
            }
        }
    }
}

/// A running filtering proxy process.
pub struct ProxyHandle {
    pid: u32,
    http_addr: SocketAddr,
    socks_addr: SocketAddr,
    socket_dir: Mutex<Option<tempfile::TempDir>>,
    http_socket: PathBuf,
    socks_socket: PathBuf,
    policy: RwLock<NetworkPolicy>,
    status: Arc<RwLock<ProxyStatus>>,
    control: tokio::sync::Mutex<ControlChannel>,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl ProxyHandle {
    /// Spawn the proxy, wait until it listens, and install `policy`.
    ///
    /// Every failure is reported as `ProxyStartFailed` and leaves no process behind.
    pub async fn start(launch: &ProxyLaunch, policy: &NetworkPolicy) -> Result<Self, SandboxError> {
        let socket_dir = tempfile::Builder::new()
            .prefix("srt-proxy-")
            .tempdir()
            .map_err(|e| SandboxError::ProxyStartFailed(format!("socket directory: {}", e)))?;
        let http_socket = socket_dir.path().join("http.sock");
        let socks_socket = socket_dir.path().join("socks.sock");

        let mut command = Command::new(&launch.program);
        command
            .arg("--http-socket")
            .arg(&http_socket)
            .arg("--socks-socket")
            .arg(&socks_socket)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if is_debug_enabled() {
            command.env(SRT_DEBUG_ENV, "1");
        }

        let mut child = command.spawn().map_err(|e| {
            SandboxError::ProxyStartFailed(format!("{}: {}", launch.program.display(), e))
        })?;

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.start_kill();
                return Err(SandboxError::ProxyStartFailed(
                    "proxy stdio not captured".to_string(),
                ));
            }
        };

        let mut control = ControlChannel {
            stdin: Some(stdin),
            events: BufReader::new(stdout).lines(),
            generation: 0,
        };

        let ready = tokio::time::timeout(launch.ready_timeout, control.next_event()).await;
        let (pid, http_addr, socks_addr) = match ready {
            Ok(Ok(Some(ControlEvent::Ready {
                pid,
                http_addr,
                socks_addr,
            }))) => (pid, http_addr, socks_addr),
            Ok(Ok(other)) => {
                let _ = child.start_kill();
                return Err(SandboxError::ProxyStartFailed(format!(
                    "expected ready message, got {:?}",
                    other
                )));
            }
            Ok(Err(e)) => {
                let _ = child.start_kill();
                return Err(SandboxError::ProxyStartFailed(e.to_string()));
            }
            Err(_) => {
                let _ = child.start_kill();
                return Err(SandboxError::ProxyStartFailed(format!(
                    "proxy not ready after {:?}",
                    launch.ready_timeout
                )));
            }
        };

        let status = Arc::new(RwLock::new(ProxyStatus::Running));
        let (stop_tx, stop_rx) = oneshot::channel();
        let watcher = tokio::spawn(watch(child, pid, status.clone(), stop_rx));

        let handle = Self {
            pid,
            http_addr,
            socks_addr,
            socket_dir: Mutex::new(Some(socket_dir)),
            http_socket,
            socks_socket,
            policy: RwLock::new(NetworkPolicy::deny_all()),
            status,
            control: tokio::sync::Mutex::new(control),
            stop_tx: Mutex::new(Some(stop_tx)),
            watcher: Mutex::new(Some(watcher)),
        };

        if let Err(e) = handle.reconfigure(policy).await {
            handle.stop().await;
            return Err(SandboxError::ProxyStartFailed(format!(
                "initial policy not applied: {}",
                e
            )));
        }

        tracing::debug!(
            "Proxy {} ready (HTTP: {}, SOCKS5: {})",
            pid,
            http_addr,
            socks_addr
        );

        Ok(handle)
    }

    /// Replace the proxy's domain lists.
    ///
    /// Returns once the proxy has acknowledged the update; from then on every
    /// new connection attempt is judged by the new lists.
    pub async fn reconfigure(&self, policy: &NetworkPolicy) -> Result<(), SandboxError> {
        let mut control = self.control.lock().await;

        match self.status() {
            ProxyStatus::Running => {}
            ProxyStatus::Crashed => return Err(SandboxError::ProxyCrashed),
            ProxyStatus::Stopped => {
                return Err(SandboxError::ProxyControl("proxy stopped".to_string()))
            }
        }

        control.generation += 1;
        let generation = control.generation;
        let request = ControlRequest::Update {
            generation,
            allowed_domains: policy.allowed_domains.clone(),
            denied_domains: policy.denied_domains.clone(),
        };

        let exchange = async {
            control.send(&request).await?;
            control.wait_for_ack(generation).await
        };
        match tokio::time::timeout(CONTROL_TIMEOUT, exchange).await {
            Ok(Ok(())) => {}
            Ok(Err(SandboxError::Io(e))) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                return Err(SandboxError::ProxyCrashed)
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(SandboxError::ProxyControl(format!(
                    "update {} not acknowledged within {:?}",
                    generation, CONTROL_TIMEOUT
                )))
            }
        }

        *self.policy.write() = policy.clone();
        tracing::debug!("Proxy {} applied policy generation {}", self.pid, generation);
        Ok(())
    }

    /// Stop the proxy: ask it to exit, then SIGTERM, then kill. Idempotent.
    pub async fn stop(&self) {
        {
            let mut status = self.status.write();
            if *status == ProxyStatus::Running {
                *status = ProxyStatus::Stopped;
            }
        }

        {
            let mut control = self.control.lock().await;
            if control.stdin.is_some() {
                let _ = control.send(&ControlRequest::Shutdown).await;
            }
            control.stdin = None;
        }

        if let Some(tx) = self.stop_tx.lock().take() {
            let _ = tx.send(());
        }

        let watcher = self.watcher.lock().take();
        if let Some(watcher) = watcher {
            let _ = watcher.await;
        }

        self.remove_socket_dir();
    }

    fn remove_socket_dir(&self) {
        if let Some(dir) = self.socket_dir.lock().take() {
            if let Err(e) = dir.close() {
                tracing::debug!("Failed to remove proxy socket directory: {}", e);
            }
        }
    }

    /// OS process id of the proxy.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Loopback address of the HTTP listener.
    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    /// Loopback address of the SOCKS5 listener.
    pub fn socks_addr(&self) -> SocketAddr {
        self.socks_addr
    }

    /// Unix socket bridged to the HTTP listener inside the sandbox.
    pub fn http_socket(&self) -> &Path {
        &self.http_socket
    }

    /// Unix socket bridged to the SOCKS5 listener inside the sandbox.
    pub fn socks_socket(&self) -> &Path {
        &self.socks_socket
    }

    /// Directory holding both Unix sockets, if not yet removed.
    pub fn socket_dir(&self) -> Option<PathBuf> {
        self.socket_dir.lock().as_ref().map(|d| d.path().to_path_buf())
    }

    /// Current liveness.
    pub fn status(&self) -> ProxyStatus {
        *self.status.read()
    }

    /// Whether the proxy is running and enforcing its policy.
    pub fn is_alive(&self) -> bool {
        self.status() == ProxyStatus::Running
    }

    /// Domain lists last acknowledged by the proxy.
    pub fn policy(&self) -> NetworkPolicy {
        self.policy.read().clone()
    }
}

impl Drop for ProxyHandle {
    fn drop(&mut self) {
        // Dropping the sender wakes the watcher, which terminates the process.
        self.stop_tx.lock().take();
        self.remove_socket_dir();
    }
}

/// Own the child until it exits or a stop is requested.
async fn watch(
    mut child: Child,
    pid: u32,
    status: Arc<RwLock<ProxyStatus>>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let exited = tokio::select! {
        result = child.wait() => Some(result),
        _ = &mut stop_rx => None,
    };

    match exited {
        Some(result) => {
            let mut status = status.write();
            if *status == ProxyStatus::Running {
                *status = ProxyStatus::Crashed;
                match result {
                    Ok(exit) => tracing::error!(
                        "Proxy process {} exited unexpectedly ({}); network access revoked",
                        pid,
                        exit
                    ),
                    Err(e) => tracing::error!(
                        "Lost track of proxy process {}: {}; network access revoked",
                        pid,
                        e
                    ),
                }
            }
        }
        None => {
            {
                let mut status = status.write();
                if *status == ProxyStatus::Running {
                    *status = ProxyStatus::Stopped;
                }
            }
            terminate(&mut child, pid).await;
        }
    }
}

async fn terminate(child: &mut Child, pid: u32) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Ok(raw) = i32::try_from(pid) {
            let _ = kill(Pid::from_raw(raw), Signal::SIGTERM);
        }
    }

    match tokio::time::timeout(STOP_GRACE, child.wait()).await {
        Ok(_) => tracing::debug!("Proxy process {} exited", pid),
        Err(_) => {
            tracing::warn!("Proxy process {} ignored SIGTERM; killing", pid);
            let _ = child.kill().await;
        }
    }
}
