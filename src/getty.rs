//! Terminal login unit manager
//!
//! Each assigned virtual terminal gets a drop-in override for its
//! `getty@ttyN.service` that logs the owner in without a password. Terminals
//! without an assignment lose their override and are masked.
//!
//! # Terminal states
//!
//! ```text
//! Unconfigured ──► EnabledIdle ──► EnabledActive
//!       │               │                │
//!       └───────────────┴──► Masked ◄────┘
//!                              │
//!              (reconcile) ────┴──► EnabledIdle
//! ```
//!
//! Masking is one-way outside of [`reconcile`].

use crate::assignment::{SessionTable, TerminalRole};
use crate::error::{KioskError, Result};
use crate::fsutil;
use crate::process_guard::CommandProcessGroup;
use crate::terminal::TerminalId;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Drop-in file name inside `getty@ttyN.service.d/`.
pub const OVERRIDE_FILE: &str = "autologin.conf";

/// Login program the override points at.
pub const AGETTY: &str = "/sbin/agetty";

/// Observable state of one terminal's login unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminalState {
    /// Unit neither enabled nor masked
    Unconfigured,
    /// Enabled but not currently running
    EnabledIdle,
    /// Enabled and running
    EnabledActive,
    /// Masked; cannot start until unmasked
    Masked,
}

impl TerminalState {
    pub const fn description(self) -> &'static str {
        match self {
            Self::Unconfigured => "unconfigured",
            Self::EnabledIdle => "enabled (idle)",
            Self::EnabledActive => "enabled (active)",
            Self::Masked => "masked",
        }
    }

    pub const fn is_enabled(self) -> bool {
        matches!(self, Self::EnabledIdle | Self::EnabledActive)
    }

    /// Derive the state from `systemctl is-enabled` / `is-active` output.
    pub fn from_unit_status(enabled: &str, active: bool) -> Self {
        let enabled = enabled.trim();
        if enabled.starts_with("masked") {
            Self::Masked
        } else if matches!(
            enabled,
            "enabled" | "enabled-runtime" | "static" | "alias" | "indirect" | "generated"
        ) {
            if active { Self::EnabledActive } else { Self::EnabledIdle }
        } else if active {
            // Started by getty.target without an explicit enable
            Self::EnabledActive
        } else {
            Self::Unconfigured
        }
    }
}

impl fmt::Display for TerminalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Rejected terminal state changes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TerminalTransitionError {
    #[error("{tty}: cannot move from {from} to {to}")]
    Invalid {
        tty: TerminalId,
        from: TerminalState,
        to: TerminalState,
    },

    #[error("{tty}: masked terminals are only re-enabled by reconcile")]
    MaskedOutsideReconcile { tty: TerminalId },
}

impl From<TerminalTransitionError> for KioskError {
    fn from(err: TerminalTransitionError) -> Self {
        KioskError::state_conflict(err.to_string())
    }
}

/// Check one state change. Staying in the same state is always allowed.
pub fn validate_transition(
    tty: TerminalId,
    from: TerminalState,
    to: TerminalState,
    via_reconcile: bool,
) -> std::result::Result<(), TerminalTransitionError> {
    use TerminalState::*;
    let allowed = from == to
        || matches!(
            (from, to),
            (Unconfigured, EnabledIdle)
                | (EnabledIdle, EnabledActive)
                | (EnabledActive, EnabledIdle)
                | (Unconfigured, Masked)
                | (EnabledIdle, Masked)
                | (EnabledActive, Masked)
        );
    if allowed {
        return Ok(());
    }
    if from == Masked && to == EnabledIdle {
        return if via_reconcile {
            Ok(())
        } else {
            Err(TerminalTransitionError::MaskedOutsideReconcile { tty })
        };
    }
    Err(TerminalTransitionError::Invalid { tty, from, to })
}

/// Seam over the service supervisor.
pub trait ServiceManager {
    fn daemon_reload(&mut self) -> Result<()>;
    fn unmask(&mut self, unit: &str) -> Result<()>;
    fn enable(&mut self, unit: &str) -> Result<()>;
    fn restart(&mut self, unit: &str) -> Result<()>;
    fn stop(&mut self, unit: &str) -> Result<()>;
    fn mask(&mut self, unit: &str) -> Result<()>;
    /// Raw `is-enabled` answer (e.g. `enabled`, `masked`, `disabled`).
    fn is_enabled(&mut self, unit: &str) -> Result<String>;
    fn is_active(&mut self, unit: &str) -> Result<bool>;

    fn state(&mut self, unit: &str) -> Result<TerminalState> {
        let enabled = self.is_enabled(unit)?;
        let active = self.is_active(unit)?;
        Ok(TerminalState::from_unit_status(&enabled, active))
    }
}

/// `systemctl` on the running system.
#[derive(Debug, Default, Clone)]
pub struct Systemctl;

impl Systemctl {
    fn run(&self, args: &[&str]) -> Result<std::process::Output> {
        debug!("systemctl {}", args.join(" "));
        Command::new("systemctl")
            .args(args)
            .in_new_process_group()
            .output()
            .map_err(|e| KioskError::system(format!("failed to run systemctl: {}", e)))
    }

    fn checked(&self, args: &[&str]) -> Result<()> {
        let output = self.run(args)?;
        if output.status.success() {
            Ok(())
        } else {
            Err(KioskError::system(format!(
                "systemctl {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

impl ServiceManager for Systemctl {
    fn daemon_reload(&mut self) -> Result<()> {
        self.checked(&["daemon-reload"])
    }

    fn unmask(&mut self, unit: &str) -> Result<()> {
        self.checked(&["unmask", unit])
    }

    fn enable(&mut self, unit: &str) -> Result<()> {
        self.checked(&["enable", unit])
    }

    fn restart(&mut self, unit: &str) -> Result<()> {
        self.checked(&["restart", unit])
    }

    fn stop(&mut self, unit: &str) -> Result<()> {
        self.checked(&["stop", unit])
    }

    fn mask(&mut self, unit: &str) -> Result<()> {
        self.checked(&["mask", unit])
    }

    fn is_enabled(&mut self, unit: &str) -> Result<String> {
        // Non-zero exit is normal for disabled and masked units
        let output = self.run(&["is-enabled", unit])?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn is_active(&mut self, unit: &str) -> Result<bool> {
        let output = self.run(&["is-active", "--quiet", unit])?;
        Ok(output.status.success())
    }
}

/// Drop-in directory for one terminal's getty unit.
pub fn override_dir(systemd_dir: &Path, tty: TerminalId) -> PathBuf {
    systemd_dir.join(format!("{}.d", tty.getty_unit()))
}

pub fn override_path(systemd_dir: &Path, tty: TerminalId) -> PathBuf {
    override_dir(systemd_dir, tty).join(OVERRIDE_FILE)
}

/// Drop-in content logging `user` in automatically.
pub fn render_override(user: &str) -> String {
    format!(
        "[Service]\nExecStart=\nExecStart=-{} --autologin {} --noclear %I $TERM\nType=idle\n",
        AGETTY, user
    )
}

/// User named in an existing override, if any.
pub fn read_override_user(systemd_dir: &Path, tty: TerminalId) -> Option<String> {
    let content = fs::read_to_string(override_path(systemd_dir, tty)).ok()?;
    content.lines().find_map(|line| {
        let mut words = line.split_whitespace();
        words.find(|w| *w == "--autologin")?;
        words.next().map(str::to_string)
    })
}

/// Result of writing one override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideWrite {
    pub path: PathBuf,
    /// Copy of a previous, different override
    pub backup: Option<PathBuf>,
    /// False when the file already held this content
    pub changed: bool,
}

/// Write the autologin override for `tty` so `role`'s owner logs in.
///
/// Re-applying the same role leaves the file content unchanged and takes
/// no backup.
pub fn apply(systemd_dir: &Path, tty: TerminalId, role: &TerminalRole) -> Result<OverrideWrite> {
    let user = role.login_user();
    let path = override_path(systemd_dir, tty);
    let content = render_override(user);
    let changed = fs::read_to_string(&path).map(|c| c != content).unwrap_or(true);
    let backup = fsutil::backup_if_changed(&path, &content)?;
    if let Some(ref b) = backup {
        info!("Backed up {} to {}", path.display(), b.display());
    }
    fsutil::write_atomic(&path, content.as_bytes(), 0o644)?;
    info!("Autologin override for {} logs in {}", tty, user);
    Ok(OverrideWrite {
        path,
        backup,
        changed,
    })
}

/// Remove the override for `tty`, keeping a backup. Returns the backup path.
pub fn remove(systemd_dir: &Path, tty: TerminalId) -> Result<Option<PathBuf>> {
    let path = override_path(systemd_dir, tty);
    let backup = fsutil::remove_with_backup(&path)?;
    if backup.is_some() {
        info!("Removed autologin override for {}", tty);
        // Leave no empty drop-in directory behind
        let _ = fs::remove_dir(override_dir(systemd_dir, tty));
    }
    Ok(backup)
}

/// How a reconcile run treats restarts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Restart enabled units so new overrides take effect now
    pub restart: bool,
    /// Terminal the operator is sitting on; its restart is deferred
    pub current_tty: Option<TerminalId>,
}

/// Restart handling for one terminal. Enabled terminals are restarted,
/// running unassigned ones are stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartOutcome {
    NotRequested,
    Restarted,
    Stopped,
    /// Would kill the operator's own session; takes effect on next login
    Deferred,
    Failed(String),
}

/// One terminal's change during reconcile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalChange {
    pub tty: TerminalId,
    pub role: Option<TerminalRole>,
    pub from: TerminalState,
    pub to: TerminalState,
    pub override_backup: Option<PathBuf>,
    pub restart: RestartOutcome,
}

/// Everything a reconcile run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub changes: Vec<TerminalChange>,
    pub warnings: Vec<String>,
}

impl ReconcileReport {
    pub fn enabled(&self) -> Vec<TerminalId> {
        self.changes
            .iter()
            .filter(|c| c.to.is_enabled())
            .map(|c| c.tty)
            .collect()
    }

    pub fn masked(&self) -> Vec<TerminalId> {
        self.changes
            .iter()
            .filter(|c| c.to == TerminalState::Masked)
            .map(|c| c.tty)
            .collect()
    }
}

/// Bring every terminal in 1..=12 in line with `table`.
///
/// Assigned terminals (menu and browsers) are unmasked, enabled and
/// optionally restarted. All others lose their override and are masked;
/// with `restart` set, any of them still running is stopped as well.
/// Overrides for assigned terminals must already be written.
pub fn reconcile(
    manager: &mut dyn ServiceManager,
    systemd_dir: &Path,
    table: &SessionTable,
    options: ReconcileOptions,
) -> Result<ReconcileReport> {
    manager.daemon_reload()?;
    let mut report = ReconcileReport::default();

    for tty in TerminalId::all() {
        let unit = tty.getty_unit();
        let from = manager.state(&unit)?;

        match table.role(tty) {
            Some(role) => {
                validate_transition(tty, from, TerminalState::EnabledIdle, true)
                    .or_else(|_| validate_transition(tty, from, TerminalState::EnabledActive, true))?;
                if from == TerminalState::Masked {
                    manager.unmask(&unit)?;
                }
                manager.enable(&unit)?;

                let restart = if !options.restart {
                    RestartOutcome::NotRequested
                } else if options.current_tty == Some(tty) {
                    let msg = format!("{}: restart deferred, this is the current session", tty);
                    warn!("{}", msg);
                    report.warnings.push(msg);
                    RestartOutcome::Deferred
                } else {
                    match manager.restart(&unit) {
                        Ok(()) => RestartOutcome::Restarted,
                        Err(e) => {
                            let msg = format!("{}: restart failed: {}", tty, e);
                            warn!("{}", msg);
                            report.warnings.push(msg.clone());
                            RestartOutcome::Failed(e.to_string())
                        }
                    }
                };
                let to = if restart == RestartOutcome::Restarted || from == TerminalState::EnabledActive {
                    TerminalState::EnabledActive
                } else {
                    TerminalState::EnabledIdle
                };
                info!("{}: {} -> {}", tty, from, to);
                report.changes.push(TerminalChange {
                    tty,
                    role: Some(role),
                    from,
                    to,
                    override_backup: None,
                    restart,
                });
            }
            None => {
                validate_transition(tty, from, TerminalState::Masked, true)?;
                let override_backup = remove(systemd_dir, tty)?;
                // Masking leaves a running session in place
                let running = options.restart && manager.is_active(&unit)?;
                manager.mask(&unit)?;

                let restart = if !running {
                    RestartOutcome::NotRequested
                } else if options.current_tty == Some(tty) {
                    let msg = format!("{}: stop deferred, this is the current session", tty);
                    warn!("{}", msg);
                    report.warnings.push(msg);
                    RestartOutcome::Deferred
                } else {
                    match manager.stop(&unit) {
                        Ok(()) => RestartOutcome::Stopped,
                        Err(e) => {
                            let msg = format!("{}: stop failed: {}", tty, e);
                            warn!("{}", msg);
                            report.warnings.push(msg);
                            RestartOutcome::Failed(e.to_string())
                        }
                    }
                };
                info!("{}: {} -> masked", tty, from);
                report.changes.push(TerminalChange {
                    tty,
                    role: None,
                    from,
                    to: TerminalState::Masked,
                    override_backup,
                    restart,
                });
            }
        }
    }

    Ok(report)
}

/// Current state of one terminal, for the `status` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalStatus {
    pub tty: TerminalId,
    pub state: TerminalState,
    pub autologin_user: Option<String>,
}

/// Read every terminal's state back from the supervisor and the overrides.
pub fn status(manager: &mut dyn ServiceManager, systemd_dir: &Path) -> Result<Vec<TerminalStatus>> {
    TerminalId::all()
        .map(|tty| {
            Ok(TerminalStatus {
                tty,
                state: manager.state(&tty.getty_unit())?,
                autologin_user: read_override_user(systemd_dir, tty),
            })
        })
        .collect()
}

/// Terminal attached to standard input, if it is a virtual console.
pub fn current_terminal() -> Option<TerminalId> {
    let target = fs::read_link("/proc/self/fd/0").ok()?;
    TerminalId::from_device_path(&target.to_string_lossy())
}
