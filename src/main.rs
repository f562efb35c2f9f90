//! CLI entry point for the policy sandbox (srt).

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use nix::sys::signal::Signal;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

use policy_sandbox::cli::Cli;
use policy_sandbox::config::{load_default_settings, load_settings, load_settings_from_string};
use policy_sandbox::manager::{ManagerOptions, SandboxManager};
use policy_sandbox::utils::init_debug_logging;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();

    // Initialize logging
    init_debug_logging(cli.debug);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let settings = match cli.settings {
        Some(ref path) => load_settings(path)
            .with_context(|| format!("loading settings from {}", path.display()))?,
        None => load_default_settings().context("loading default settings")?,
    };

    let command = cli
        .get_command()
        .context("No command specified. Use -c <command> or provide command as arguments.")?;

    // Installed before anything needs cleaning up
    let mut signals = listen_for_termination().context("installing signal handlers")?;

    let options = ManagerOptions {
        seccomp: settings.seccomp.clone(),
        proxy_program: settings.proxy_program.clone(),
        ..Default::default()
    };
    let manager = Arc::new(SandboxManager::new(options)?);
    manager
        .initialize(settings.policy)
        .await
        .context("Failed to initialize sandbox")?;

    let control = match cli.control_fd {
        Some(fd) => match spawn_control_reader(manager.clone(), fd) {
            Ok(task) => Some(task),
            Err(e) => {
                manager.teardown().await;
                return Err(e);
            }
        },
        None => None,
    };

    let status = execute(&manager, &command, cli.unescaped, &mut signals).await;

    if let Some(task) = control {
        task.abort();
    }
    manager.teardown().await;
    status
}

/// Signals that stop the command and still let `srt` tear down.
const TERMINATION_SIGNALS: [Signal; 4] = [
    Signal::SIGHUP,
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGTERM,
];

/// Install handlers for every termination signal, delivering each arrival on
/// the returned channel instead of killing the process.
fn listen_for_termination() -> std::io::Result<mpsc::UnboundedReceiver<Signal>> {
    let (tx, rx) = mpsc::unbounded_channel();
    for signo in TERMINATION_SIGNALS {
        let mut stream = signal(SignalKind::from_raw(signo as i32))?;
        let tx = tx.clone();
        tokio::spawn(async move {
            while stream.recv().await.is_some() {
                if tx.send(signo).is_err() {
                    break;
                }
            }
        });
    }
    Ok(rx)
}

/// Wrap and run the command, returning its exit code. A termination signal
/// stops the command and returns so the caller can tear down.
async fn execute(
    manager: &SandboxManager,
    command: &str,
    unescaped: bool,
    signals: &mut mpsc::UnboundedReceiver<Signal>,
) -> Result<ExitCode> {
    let wrapped = if unescaped {
        manager.wrap_with_sandbox_unescaped(command).await
    } else {
        manager.wrap_with_sandbox(command).await
    }
    .context("Failed to wrap command")?;

    tracing::debug!("Wrapped command: {}", wrapped);

    let mut child = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(&wrapped)
        .spawn()
        .context("Failed to execute command")?;

    let signo = tokio::select! {
        status = child.wait() => {
            let status = status.context("Failed to wait for command")?;
            return Ok(exit_code(status));
        }
        Some(received) = signals.recv() => received as i32,
    };

    tracing::debug!("Received signal {}; stopping command", signo);
    let _ = child.start_kill();
    let _ = child.wait().await;
    Ok(ExitCode::from((128 + signo) as u8))
}

fn exit_code(status: std::process::ExitStatus) -> ExitCode {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => ExitCode::from(code as u8),
        (None, Some(signo)) => ExitCode::from((128 + signo) as u8),
        (None, None) => ExitCode::from(1),
    }
}

/// Apply each valid settings line read from `fd` as a policy update.
/// Invalid lines are ignored and the last good policy stays in force.
fn spawn_control_reader(
    manager: Arc<SandboxManager>,
    fd: i32,
) -> Result<tokio::task::JoinHandle<()>> {
    use std::os::fd::FromRawFd;

    nix::fcntl::fcntl(fd, nix::fcntl::FcntlArg::F_GETFD)
        .with_context(|| format!("control fd {} is not open", fd))?;
    // SAFETY: the fd is open and handed over to this process for its lifetime.
    let file = unsafe { std::fs::File::from_raw_fd(fd) };

    Ok(tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::fs::File::from_std(file)).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let Some(settings) = load_settings_from_string(&line) else {
                        continue;
                    };
                    if let Err(e) = manager.update_config(settings.policy).await {
                        tracing::warn!("Policy update failed: {}", e);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Control fd read failed: {}", e);
                    break;
                }
            }
        }
    }))
}
