//! Menu runner
//!
//! Drives the configured actions, either from the interactive text menu or
//! as one unattended full install.
//!
//! # States
//!
//! ```text
//! Idle ──(number)──► Executing ──► Idle
//!  │
//!  ├──(f)──► FullInstall ──► Idle | Terminated (reboot)
//!  │
//!  └──(q / EOF / reboot / update)──► Terminated
//! ```
//!
//! Any action failure returns to Idle, except the autologin step: a broken
//! autologin can lock an unattended kiosk out of recovery, so its failure
//! ends the run.

use crate::accounts::AccountDirectory;
use crate::assignment::SessionTable;
use crate::context::Context;
use crate::error::{KioskError, Result};
use crate::getty::{self, ReconcileOptions, ServiceManager};
use crate::menu_config::{self, MenuEntry};
use crate::network;
use crate::process_guard::CommandProcessGroup;
use crate::prompt::Prompter;
use crate::sanity;
use crate::script_runner::{ActionExecutor, OutputMode};
use crate::scripts::action::ActionArgs;
use crate::session::{self, SessionReport};
use crate::update::{self, Fetch};
use crate::wait::{self, CancelToken, WaitOutcome};
use crossterm::cursor::MoveTo;
use crossterm::style::Stylize;
use crossterm::terminal::{Clear, ClearType};
use std::ffi::OsString;
use std::io::{BufRead, Write};
use std::path::Path;
use std::process::Command;
use std::time::Duration;
use strum::{EnumIter, IntoEnumIterator};
use tracing::{error, info, warn};

/// Reference of the built-in session setup step.
pub const BUILTIN_AUTOLOGIN: &str = "@autologin";

/// Runner state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuState {
    Idle,
    Executing,
    FullInstall,
    Terminated,
}

/// Commands available besides the numbered entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
pub enum FixedCommand {
    FullInstall,
    Update,
    Reboot,
    Shell,
    Quit,
}

impl FixedCommand {
    pub const fn key(self) -> char {
        match self {
            Self::FullInstall => 'f',
            Self::Update => 'u',
            Self::Reboot => 'r',
            Self::Shell => 's',
            Self::Quit => 'q',
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::FullInstall => "Full install",
            Self::Update => "Update ms-util",
            Self::Reboot => "Reboot",
            Self::Shell => "Shell",
            Self::Quit => "Quit",
        }
    }

    pub fn from_key(input: &str) -> Option<Self> {
        let mut chars = input.chars();
        let c = chars.next()?.to_ascii_lowercase();
        if chars.next().is_some() {
            return None;
        }
        Self::iter().find(|cmd| cmd.key() == c)
    }
}

/// One line of operator input, interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuCommand {
    /// Zero-based position in the displayed list
    Select(usize),
    Fixed(FixedCommand),
    Unknown(String),
}

/// Interpret `input` against a menu of `entry_count` entries.
pub fn parse_command(input: &str, entry_count: usize) -> MenuCommand {
    let input = input.trim();
    if let Ok(n) = input.parse::<usize>() {
        if (1..=entry_count).contains(&n) {
            return MenuCommand::Select(n - 1);
        }
    }
    FixedCommand::from_key(input)
        .map(MenuCommand::Fixed)
        .unwrap_or_else(|| MenuCommand::Unknown(input.to_string()))
}

/// Machine-level operations the menu can trigger.
pub trait Host {
    /// Environment checks that must pass before units or accounts change.
    fn preflight(&mut self) -> Result<()>;
    fn reboot(&mut self) -> Result<()>;
    fn open_shell(&mut self) -> Result<()>;
    /// Replace this process with `program`. Returns only if that failed.
    fn relaunch(&mut self, program: &Path) -> Result<()>;
}

/// The real machine.
#[derive(Debug, Clone, Default)]
pub struct SystemHost {
    /// Arguments to pass again on relaunch
    args: Vec<OsString>,
}

impl SystemHost {
    pub fn new(args: Vec<OsString>) -> Self {
        Self { args }
    }
}

impl Host for SystemHost {
    fn preflight(&mut self) -> Result<()> {
        sanity::run_preflight_checks()
    }

    fn reboot(&mut self) -> Result<()> {
        info!("Rebooting");
        let status = Command::new("systemctl")
            .arg("reboot")
            .status()
            .map_err(|e| KioskError::system(format!("failed to run systemctl reboot: {}", e)))?;
        if status.success() {
            Ok(())
        } else {
            Err(KioskError::system(format!("systemctl reboot exited with {}", status)))
        }
    }

    fn open_shell(&mut self) -> Result<()> {
        let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string());
        info!("Opening shell {}", shell);
        Command::new(&shell)
            .with_parent_death_signal()
            .status()
            .map_err(|e| KioskError::system(format!("failed to start {}: {}", shell, e)))?;
        Ok(())
    }

    fn relaunch(&mut self, program: &Path) -> Result<()> {
        Err(update::relaunch(program, &self.args))
    }
}

/// Side-effecting collaborators of the runner.
pub struct MenuServices<'a> {
    pub actions: &'a mut dyn ActionExecutor,
    pub units: &'a mut dyn ServiceManager,
    pub accounts: &'a mut dyn AccountDirectory,
    pub fetcher: &'a dyn Fetch,
    pub host: &'a mut dyn Host,
}

/// What a full install did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FullInstallReport {
    /// Action references that completed, in order
    pub executed: Vec<String>,
    /// Actions that exited non-zero
    pub failed: Vec<String>,
    /// Actions with no runnable script
    pub skipped: Vec<String>,
    pub session: Option<SessionReport>,
    pub rebooted: bool,
}

/// The menu runner.
pub struct MenuRunner<'a, R, W> {
    ctx: &'a Context,
    entries: Vec<MenuEntry>,
    session: Option<SessionTable>,
    services: MenuServices<'a>,
    prompter: Prompter<R, W>,
    cancel: CancelToken,
    state: MenuState,
    styled: bool,
}

impl<'a, R: BufRead, W: Write> MenuRunner<'a, R, W> {
    pub fn new(
        ctx: &'a Context,
        entries: Vec<MenuEntry>,
        services: MenuServices<'a>,
        prompter: Prompter<R, W>,
        cancel: CancelToken,
    ) -> Result<Self> {
        let session = ctx.session_table()?;
        Ok(Self {
            ctx,
            entries,
            session,
            services,
            prompter,
            cancel,
            state: MenuState::Idle,
            styled: false,
        })
    }

    /// Use terminal colors and clear the screen between menus.
    pub fn styled(mut self, styled: bool) -> Self {
        self.styled = styled;
        self
    }

    pub fn state(&self) -> MenuState {
        self.state
    }

    pub fn session(&self) -> Option<&SessionTable> {
        self.session.as_ref()
    }

    pub fn into_prompter(self) -> Prompter<R, W> {
        self.prompter
    }

    fn interactive(&self) -> bool {
        self.ctx.options.interactive()
    }

    fn say(&mut self, text: impl std::fmt::Display) -> Result<()> {
        self.prompter.say(text)?;
        Ok(())
    }

    fn report_error(&mut self, context: &str, err: &KioskError) -> Result<()> {
        error!("{}: {}", context, err);
        let line = format!("✗ {}: {}", context, err);
        if self.styled {
            self.say(line.red())
        } else {
            self.say(line)
        }
    }

    /// True for the entry that performs session setup.
    pub fn is_autologin(&self, entry: &MenuEntry) -> bool {
        entry.action_ref == BUILTIN_AUTOLOGIN || entry.action_ref == self.ctx.settings.autologin_action
    }

    fn render(&mut self) -> Result<()> {
        let menu_tty = self.ctx.menu_terminal()?;
        let listed: Vec<MenuEntry> = menu_config::display_order(&self.entries)
            .into_iter()
            .cloned()
            .collect();
        let styled = self.styled;
        let out = self.prompter.output();
        if styled {
            crossterm::queue!(out, Clear(ClearType::All), MoveTo(0, 0))?;
            writeln!(out, "{}", format!(" ms-util  (menu on {})", menu_tty).bold().cyan())?;
        } else {
            writeln!(out, " ms-util  (menu on {})", menu_tty)?;
        }
        writeln!(out, " {}", "─".repeat(40))?;
        for (i, entry) in listed.iter().enumerate() {
            let manual = if entry.exec_order.is_manual_only() { "  [manual]" } else { "" };
            if entry.description.is_empty() {
                writeln!(out, " {:>2}) {}{}", i + 1, entry.name, manual)?;
            } else {
                writeln!(out, " {:>2}) {} - {}{}", i + 1, entry.name, entry.description, manual)?;
            }
        }
        writeln!(out)?;
        let fixed = FixedCommand::iter()
            .map(|c| format!("{}) {}", c.key(), c.label()))
            .collect::<Vec<_>>()
            .join("   ");
        writeln!(out, "  {}", fixed)?;
        out.flush()?;
        Ok(())
    }

    /// Interactive loop until quit, end of input, reboot or relaunch.
    pub fn run(&mut self) -> Result<()> {
        self.state = MenuState::Idle;
        while self.state != MenuState::Terminated {
            if self.cancel.is_cancelled() {
                self.cancel.reset();
                if self.prompter.confirm("Exit ms-util?", false)? {
                    return Err(KioskError::Interrupted);
                }
            }
            self.render()?;
            let Some(line) = self.prompter.read_line("Select: ")? else {
                info!("End of input, leaving menu");
                self.state = MenuState::Terminated;
                break;
            };
            if line.trim().is_empty() {
                continue;
            }
            match parse_command(&line, self.entries.len()) {
                MenuCommand::Select(index) => self.execute_selection(index)?,
                MenuCommand::Fixed(FixedCommand::FullInstall) => self.menu_full_install()?,
                MenuCommand::Fixed(FixedCommand::Update) => match self.update() {
                    Ok(()) => {}
                    Err(KioskError::Interrupted) => return Err(KioskError::Interrupted),
                    Err(e) => self.report_error("Update failed", &e)?,
                },
                MenuCommand::Fixed(FixedCommand::Reboot) => {
                    if self.prompter.confirm("Reboot now?", false)? {
                        match self.services.host.reboot() {
                            Ok(()) => self.state = MenuState::Terminated,
                            Err(e) => self.report_error("Reboot", &e)?,
                        }
                    }
                }
                MenuCommand::Fixed(FixedCommand::Shell) => {
                    if let Err(e) = self.services.host.open_shell() {
                        self.report_error("Shell", &e)?;
                    }
                    self.cancel.reset();
                }
                MenuCommand::Fixed(FixedCommand::Quit) => self.state = MenuState::Terminated,
                MenuCommand::Unknown(input) => {
                    self.say(format!("Unknown selection '{}'", input))?;
                }
            }
        }
        Ok(())
    }

    fn execute_selection(&mut self, index: usize) -> Result<()> {
        let Some(entry) = menu_config::display_order(&self.entries)
            .get(index)
            .map(|e| (*e).clone())
        else {
            return Ok(());
        };
        self.state = MenuState::Executing;
        let autologin = self.is_autologin(&entry);
        if autologin && entry.action_ref == BUILTIN_AUTOLOGIN && self.session.is_none() {
            match self.prompt_session() {
                Ok(session) => self.session = session,
                Err(e) => {
                    self.report_error(&entry.name, &e)?;
                    self.state = MenuState::Idle;
                    return Ok(());
                }
            }
        }

        let result = self.run_entry(&entry, true);
        self.state = MenuState::Idle;
        match result {
            Ok(_) => self.say(format!("✓ {} completed", entry.name)),
            Err(KioskError::Interrupted) => Err(KioskError::Interrupted),
            Err(e) if autologin => {
                self.report_error(&entry.name, &e)?;
                self.state = MenuState::Terminated;
                Err(e)
            }
            Err(e) => self.report_error(&entry.name, &e),
        }
    }

    fn menu_full_install(&mut self) -> Result<()> {
        if self.session.is_none() && self.interactive() {
            match self.prompt_session() {
                Ok(session) => self.session = session,
                Err(e) => return self.report_error("Full install", &e),
            }
        }
        match self.full_install() {
            Ok(report) => {
                if report.rebooted {
                    self.state = MenuState::Terminated;
                }
                Ok(())
            }
            Err(e) => {
                self.report_error("Full install aborted", &e)?;
                self.state = MenuState::Terminated;
                Err(e)
            }
        }
    }

    fn prompt_session(&mut self) -> Result<Option<SessionTable>> {
        let menu = self.ctx.menu_terminal()?;
        let Some(line) = self
            .prompter
            .read_line("Browser assignments (user:tty:url[,...], blank to skip): ")?
        else {
            return Ok(None);
        };
        if line.trim().is_empty() {
            return Ok(None);
        }
        SessionTable::parse(line.trim(), menu).map(Some)
    }

    /// Run one entry's action. The autologin step reports what it applied.
    fn run_entry(&mut self, entry: &MenuEntry, restart_units: bool) -> Result<Option<SessionReport>> {
        info!("Running action {} ({})", entry.name, entry.action_ref);
        if entry.action_ref == BUILTIN_AUTOLOGIN {
            return self.apply_session(restart_units);
        }
        if entry.is_builtin() {
            return Err(KioskError::not_found(format!(
                "unknown built-in action {}",
                entry.action_ref
            )));
        }

        let args = ActionArgs::from_context(&entry.action_ref, self.ctx, self.session.as_ref());
        let mode = if self.interactive() { OutputMode::Inherit } else { OutputMode::Relay };
        let output = self.services.actions.run(&args, mode)?;
        if mode == OutputMode::Inherit {
            // A Ctrl+C typed at the script was meant for the script
            self.cancel.reset();
        }
        if output.success {
            Ok(None)
        } else {
            Err(KioskError::CollaboratorFailure {
                action: entry.action_ref.clone(),
                code: output.exit_code.unwrap_or(-1),
                fatal: self.is_autologin(entry),
            })
        }
    }

    /// Apply the session plan natively.
    fn apply_session(&mut self, restart_units: bool) -> Result<Option<SessionReport>> {
        let Some(table) = self.session.as_ref() else {
            warn!("No browser assignments given; session setup skipped");
            return Ok(None);
        };
        self.services.host.preflight()?;
        let options = ReconcileOptions {
            restart: restart_units,
            current_tty: if restart_units { getty::current_terminal() } else { None },
        };
        let report = session::apply_session_plan(
            &self.ctx.settings,
            table,
            &mut *self.services.units,
            &mut *self.services.accounts,
            options,
        )?;
        for warning in &report.reconcile.warnings {
            self.prompter.say(format!("⚠ {}", warning))?;
        }
        Ok(Some(report))
    }

    /// Run every non-manual entry in execution order, apply the session
    /// plan if no entry did, then reboot.
    ///
    /// Failures of ordinary actions are logged and skipped over. A failing
    /// autologin step aborts with no reboot.
    pub fn full_install(&mut self) -> Result<FullInstallReport> {
        self.state = MenuState::FullInstall;
        let result = self.full_install_steps();
        self.state = MenuState::Idle;
        result
    }

    fn full_install_steps(&mut self) -> Result<FullInstallReport> {
        info!("Full install started");
        let mut report = FullInstallReport::default();
        self.services.host.preflight()?;
        self.wait_for_network()?;

        let plan: Vec<MenuEntry> = menu_config::execution_plan(&self.entries)
            .into_iter()
            .cloned()
            .collect();
        let mut autologin_ran = false;

        for entry in &plan {
            let autologin = self.is_autologin(entry);
            self.say(format!("==> [{}] {}", entry.exec_order, entry.name))?;
            match self.run_entry(entry, false) {
                Ok(session) => {
                    if autologin {
                        autologin_ran = true;
                        report.session = session;
                    }
                    report.executed.push(entry.action_ref.clone());
                    self.say(format!("✓ {}", entry.name))?;
                }
                Err(KioskError::NotFound(msg)) => {
                    warn!("Skipping {}: {}", entry.name, msg);
                    self.say(format!("⚠ skipped {}: {}", entry.name, msg))?;
                    report.skipped.push(entry.action_ref.clone());
                }
                Err(KioskError::Interrupted) => return Err(KioskError::Interrupted),
                Err(e) if autologin => {
                    error!("Autologin step failed, aborting full install: {}", e);
                    return Err(e);
                }
                Err(e) => {
                    self.report_error(&entry.name, &e)?;
                    report.failed.push(entry.action_ref.clone());
                }
            }
        }

        if !autologin_ran && self.session.is_some() {
            self.say("==> Session setup")?;
            report.session = self.apply_session(false)?;
            self.say("✓ Session setup")?;
        }

        info!(
            "Full install finished: {} ok, {} failed, {} skipped",
            report.executed.len(),
            report.failed.len(),
            report.skipped.len()
        );
        report.rebooted = self.reboot_after_install()?;
        Ok(report)
    }

    fn wait_for_network(&mut self) -> Result<()> {
        let Some(probe) = self.ctx.settings.connectivity_probe.clone() else {
            return Ok(());
        };
        let timeout = Duration::from_secs(self.ctx.settings.connectivity_timeout_secs);
        let interactive = self.interactive();
        loop {
            let out = self.prompter.output();
            let outcome = network::wait_for_connectivity(&probe, timeout, &self.cancel, |left| {
                if interactive {
                    let _ = write!(out, "\rWaiting for network... {:>3}s left ", left.as_secs());
                    let _ = out.flush();
                }
            });
            if interactive {
                writeln!(self.prompter.output())?;
            }
            match outcome {
                WaitOutcome::Ready(()) => return Ok(()),
                WaitOutcome::TimedOut => {
                    return self.say("⚠ No network connectivity; continuing anyway");
                }
                WaitOutcome::Cancelled => {
                    self.cancel.reset();
                    if !interactive || self.prompter.confirm("Abort the full install?", false)? {
                        return Err(KioskError::Interrupted);
                    }
                }
            }
        }
    }

    /// Countdown (interactive) or fixed delay (unattended), then reboot.
    fn reboot_after_install(&mut self) -> Result<bool> {
        if self.interactive() {
            let mut left = self.ctx.settings.reboot_countdown_secs;
            loop {
                let out = self.prompter.output();
                let finished = wait::countdown(Duration::from_secs(left), &self.cancel, |secs| {
                    left = secs;
                    let _ = write!(out, "\rRebooting in {:>2}s (Ctrl+C to cancel) ", secs);
                    let _ = out.flush();
                });
                writeln!(self.prompter.output())?;
                if finished {
                    break;
                }
                self.cancel.reset();
                if self.prompter.confirm("Cancel the reboot?", true)? {
                    self.say("Reboot cancelled")?;
                    return Ok(false);
                }
                left = left.max(1);
            }
        } else {
            let delay = Duration::from_secs(self.ctx.settings.reboot_delay_secs);
            info!("Rebooting in {}s", delay.as_secs());
            if !wait::countdown(delay, &self.cancel, |_| {}) {
                return Err(KioskError::Interrupted);
            }
        }
        self.services.host.reboot()?;
        Ok(true)
    }

    /// Download and install a new ms-util, then relaunch into it.
    ///
    /// Interactive runs offer an alternate source when the release is
    /// missing and a retry on network errors.
    pub fn update(&mut self) -> Result<()> {
        let ctx = self.ctx;
        let interactive = self.interactive();
        let mut source = match ctx.update_source() {
            Some(s) => s.to_string(),
            None if interactive => match self.prompter.read_line("Update source URL (blank to cancel): ")? {
                Some(s) if !s.trim().is_empty() => s.trim().to_string(),
                _ => return Err(KioskError::validation("no update source given")),
            },
            None => {
                return Err(KioskError::validation(
                    "no update source configured; pass --source",
                ));
            }
        };

        loop {
            let result = update::download_and_install(
                self.services.fetcher,
                &source,
                ctx.channel(),
                &ctx.settings.paths.install_path,
                ctx.settings.update.attempts,
                Duration::from_secs(ctx.settings.update.backoff_secs),
                &self.cancel,
            );
            match result {
                Ok(path) => {
                    self.say(format!("✓ Updated {}; restarting", path.display()))?;
                    self.services.host.relaunch(&path)?;
                    self.state = MenuState::Terminated;
                    return Ok(());
                }
                Err(KioskError::NotFound(url)) if interactive => {
                    self.say(format!("✗ No release at {}", url))?;
                    match self
                        .prompter
                        .read_line("Alternate source URL (blank to abort): ")?
                    {
                        Some(s) if !s.trim().is_empty() => source = s.trim().to_string(),
                        _ => return Err(KioskError::NotFound(url)),
                    }
                }
                Err(e @ KioskError::TransientNetwork(_)) if interactive => {
                    self.report_error("Download", &e)?;
                    if !self.prompter.confirm("Retry the download?", true)? {
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("2", 3), MenuCommand::Select(1));
        assert_eq!(parse_command(" 3 \n", 3), MenuCommand::Select(2));
        assert_eq!(parse_command("4", 3), MenuCommand::Unknown("4".into()));
        assert_eq!(parse_command("0", 3), MenuCommand::Unknown("0".into()));
        assert_eq!(parse_command("F", 3), MenuCommand::Fixed(FixedCommand::FullInstall));
        assert_eq!(parse_command("q", 0), MenuCommand::Fixed(FixedCommand::Quit));
        assert_eq!(parse_command("quit", 3), MenuCommand::Unknown("quit".into()));
    }

    #[test]
    fn test_fixed_keys_unique() {
        let keys: std::collections::HashSet<char> = FixedCommand::iter().map(|c| c.key()).collect();
        assert_eq!(keys.len(), FixedCommand::iter().count());
        for cmd in FixedCommand::iter() {
            assert_eq!(FixedCommand::from_key(&cmd.key().to_string()), Some(cmd));
        }
    }
}
