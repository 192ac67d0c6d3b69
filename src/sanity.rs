//! Pre-flight sanity checks for runtime environment
//!
//! Session setup and full installs rewrite systemd units and user accounts.
//! Before either starts this module verifies:
//! - Required runtime binaries are present
//! - Running with root privileges (EUID 0)
//!
//! A failed check stops the run with a clear message before anything is
//! touched.

use crate::error::{KioskError, Result};

/// Result of environment verification
#[derive(Debug)]
pub struct SanityCheckResult {
    pub missing_binaries: Vec<String>,
    pub is_root: bool,
}

impl SanityCheckResult {
    /// Returns true if all checks passed
    pub fn is_ok(&self) -> bool {
        self.missing_binaries.is_empty() && self.is_root
    }

    /// Human-readable list of failed checks.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !self.is_root {
            problems.push("root privileges required (run with sudo)".to_string());
        }
        for binary in &self.missing_binaries {
            problems.push(format!(
                "{} not found on PATH (install: apt install {})",
                binary,
                get_package_for_binary(binary)
            ));
        }
        problems
    }
}

/// Required runtime binaries for session setup
const REQUIRED_BINARIES: &[&str] = &[
    "bash",      // Action scripts
    "systemctl", // Login unit management
    "agetty",    // Autologin target of the overrides
];

/// Optional binaries (warn if missing but don't fail)
const OPTIONAL_BINARIES: &[&str] = &[
    "xinit",   // Needed at kiosk login, usually installed by an action
    "useradd", // Only when kiosk users must be created
];

/// Check if a binary is available in PATH
fn binary_exists(name: &str) -> bool {
    if which::which(name).is_ok() {
        return true;
    }
    // agetty lives in /sbin, which is not always on a user's PATH
    ["/sbin", "/usr/sbin"]
        .iter()
        .any(|dir| std::path::Path::new(dir).join(name).is_file())
}

/// Check if running as root (EUID 0)
fn is_running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Perform all sanity checks and return the result
pub fn verify_environment() -> SanityCheckResult {
    let missing = REQUIRED_BINARIES
        .iter()
        .filter(|b| !binary_exists(b))
        .map(|b| (*b).to_string())
        .collect();

    for binary in OPTIONAL_BINARIES {
        if !binary_exists(binary) {
            tracing::warn!("Optional binary not found: {}", binary);
        }
    }

    SanityCheckResult {
        missing_binaries: missing,
        is_root: is_running_as_root(),
    }
}

/// Map binary names to their Debian package names
fn get_package_for_binary(binary: &str) -> &'static str {
    match binary {
        "bash" => "bash",
        "systemctl" => "systemd",
        "agetty" => "util-linux",
        "xinit" => "xinit",
        "useradd" => "passwd",
        _ => "unknown",
    }
}

/// Skip root check (for development on a staging tree)
/// Set MEDIASCREEN_SKIP_ROOT_CHECK=1 to skip
pub fn should_skip_root_check() -> bool {
    std::env::var("MEDIASCREEN_SKIP_ROOT_CHECK")
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false)
}

/// Verify the environment, failing with every problem found.
pub fn run_preflight_checks() -> Result<()> {
    tracing::debug!("Running pre-flight sanity checks...");
    let mut result = verify_environment();
    if should_skip_root_check() {
        tracing::warn!("Root check skipped (MEDIASCREEN_SKIP_ROOT_CHECK=1)");
        result.is_root = true;
    }

    if !result.is_ok() {
        return Err(KioskError::system(format!(
            "pre-flight checks failed: {}",
            result.problems().join("; ")
        )));
    }

    tracing::info!("Pre-flight checks passed");
    Ok(())
}
