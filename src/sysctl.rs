use std::path::PathBuf;
use anyhow::{bail, Context};
use tracing::{error, info};

pub const ICMP_ECHO_IGNORE_ALL: &str = "net.ipv4.icmp_echo_ignore_all";

fn sysctl_path(key: &str) -> anyhow::Result<PathBuf> {
    if !cfg!(any(target_os = "linux", target_os = "android")) {
        bail!("/proc/sys/ not available");
    }
    Ok(PathBuf::from("/proc/sys").join(key.replace('.', "/")))
}

pub fn sysctl_get(key: &str) -> anyhow::Result<String> {
    let path = sysctl_path(key)?;
    std::fs::read_to_string(&path)
        .with_context(|| format!("error reading {:?}", path))
}

pub fn sysctl_set(key: &str, value: &str) -> anyhow::Result<()> {
    let path = sysctl_path(key)?;
    std::fs::write(&path, value)
        .with_context(|| format!("error writing {:?}", path))
}

/// Keeps the kernel from answering pings for as long as it lives, so the remote endpoint can
///  answer them instead. The original setting is restored on drop.
pub struct KernelEchoGuard {
    original: String,
}

impl KernelEchoGuard {
    /// Returns `Ok(None)` if kernel echo replies are disabled already; there is nothing to take
    ///  over (or restore) in that case.
    pub fn take_over() -> anyhow::Result<Option<KernelEchoGuard>> {
        let original = sysctl_get(ICMP_ECHO_IGNORE_ALL)?;
        if original.trim().parse::<u32>().ok() != Some(0) {
            info!("ping already disabled: {} = {}", ICMP_ECHO_IGNORE_ALL, original.trim());
            return Ok(None);
        }

        sysctl_set(ICMP_ECHO_IGNORE_ALL, "1\n")?;
        info!("disabled ping [key:{}]", ICMP_ECHO_IGNORE_ALL);
        Ok(Some(KernelEchoGuard { original }))
    }
}

impl Drop for KernelEchoGuard {
    fn drop(&mut self) {
        match sysctl_set(ICMP_ECHO_IGNORE_ALL, &self.original) {
            Ok(()) => info!("re-enabled ping [key:{}]", ICMP_ECHO_IGNORE_ALL),
            Err(e) => error!("re-enable ping: {:#}", e),
        }
    }
}
