//! Install a seccomp filter, then exec a program under it.
//!
//! Usage: `srt-apply-seccomp <bpf-file> <program> [args...]`. Never execs the
//! program when the filter cannot be installed.

#[cfg(target_os = "linux")]
fn main() -> anyhow::Result<()> {
    use std::ffi::CString;

    use anyhow::{bail, Context};

    let mut args = std::env::args_os().skip(1);
    let (Some(bpf_path), Some(program)) = (args.next(), args.next()) else {
        bail!("usage: srt-apply-seccomp <bpf-file> <program> [args...]");
    };

    let bytecode = std::fs::read(&bpf_path)
        .with_context(|| format!("reading {}", bpf_path.to_string_lossy()))?;
    let filter = decode_filter(&bytecode)?;

    let argv = std::iter::once(program)
        .chain(args)
        .map(|arg| {
            use std::os::unix::ffi::OsStringExt;
            CString::new(arg.into_vec()).context("argument contains a NUL byte")
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    install_filter(&filter)?;

    match nix::unistd::execvp(&argv[0], &argv) {
        Ok(never) => match never {},
        Err(err) => bail!("exec {}: {}", argv[0].to_string_lossy(), err),
    }
}

/// Split raw bytecode into `struct sock_filter` records.
#[cfg(target_os = "linux")]
fn decode_filter(bytecode: &[u8]) -> anyhow::Result<Vec<libc::sock_filter>> {
    const RECORD: usize = 8;

    if bytecode.is_empty() || bytecode.len() % RECORD != 0 {
        anyhow::bail!(
            "seccomp bytecode has invalid length {} (not a multiple of {})",
            bytecode.len(),
            RECORD
        );
    }

    Ok(bytecode
        .chunks_exact(RECORD)
        .map(|record| libc::sock_filter {
            code: u16::from_ne_bytes([record[0], record[1]]),
            jt: record[2],
            jf: record[3],
            k: u32::from_ne_bytes([record[4], record[5], record[6], record[7]]),
        })
        .collect())
}

#[cfg(target_os = "linux")]
fn install_filter(filter: &[libc::sock_filter]) -> anyhow::Result<()> {
    let len = u16::try_from(filter.len())
        .map_err(|_| anyhow::anyhow!("seccomp filter too long ({} instructions)", filter.len()))?;
    let program = libc::sock_fprog {
        len,
        filter: filter.as_ptr() as *mut libc::sock_filter,
    };

    // SAFETY: plain prctl calls; `program` outlives the second one.
    unsafe {
        let (one, zero): (libc::c_ulong, libc::c_ulong) = (1, 0);
        if libc::prctl(libc::PR_SET_NO_NEW_PRIVS, one, zero, zero, zero) != 0 {
            anyhow::bail!(
                "PR_SET_NO_NEW_PRIVS: {}",
                std::io::Error::last_os_error()
            );
        }
        if libc::prctl(
            libc::PR_SET_SECCOMP,
            libc::SECCOMP_MODE_FILTER as libc::c_ulong,
            &program as *const libc::sock_fprog,
        ) != 0
        {
            anyhow::bail!("PR_SET_SECCOMP: {}", std::io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn main() -> std::process::ExitCode {
    eprintln!("srt-apply-seccomp is only supported on Linux");
    std::process::ExitCode::from(1)
}
