//! Platform detection
//!
//! Decides which inference backends can run on this machine.

use once_cell::sync::Lazy;

#[cfg(not(target_os = "macos"))]
use std::process::Command;

/// Hardware facts that gate backend availability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Platform {
    /// macOS on an Apple M-series chip (Metal)
    pub apple_silicon: bool,
    /// An NVIDIA driver answered `nvidia-smi`
    pub cuda: bool,
}

static CURRENT: Lazy<Platform> = Lazy::new(Platform::detect);

impl Platform {
    /// Platform of the running machine, detected once per process
    pub fn current() -> &'static Platform {
        &CURRENT
    }

    /// Probe the machine (best effort)
    pub fn detect() -> Platform {
        let platform = Platform {
            apple_silicon: cfg!(all(target_os = "macos", target_arch = "aarch64")),
            cuda: detect_cuda(),
        };
        tracing::info!(
            "Platform: apple_silicon={} cuda={}",
            platform.apple_silicon,
            platform.cuda
        );
        platform
    }
}

// =============================================================================
// CUDA detection
// =============================================================================

#[cfg(target_os = "macos")]
fn detect_cuda() -> bool {
    false
}

#[cfg(not(target_os = "macos"))]
fn detect_cuda() -> bool {
    let output = Command::new("nvidia-smi")
        .args(["--query-gpu=name", "--format=csv,noheader"])
        .output();

    let Ok(output) = output else {
        return false;
    };

    if !output.status.success() {
        return false;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    match stdout.lines().find(|l| !l.trim().is_empty()) {
        Some(name) => {
            tracing::debug!("CUDA device detected: {}", name.trim());
            true
        }
        None => false,
    }
}
