//! Run context passed to every component.
//!
//! Command-line flags are parsed once into [`RunOptions`]; together with the
//! loaded [`Settings`] they form the [`Context`] every operation receives.
//! Nothing reads the raw argument list after this point.

use crate::assignment::{DEFAULT_BROWSER_TERMINAL, DEFAULT_MENU_TERMINAL, SessionTable};
use crate::cli::Cli;
use crate::error::{KioskError, Result};
use crate::settings::Settings;
use crate::terminal::TerminalId;

/// Immutable options from one parse of the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Never prompt
    pub auto: bool,
    pub debug: bool,
    pub user: Option<String>,
    pub url: Option<String>,
    /// Alternate source location
    pub source: Option<String>,
    /// Alternate release channel
    pub channel: Option<String>,
    /// Assignment string given with `--full-install` or `autologin --assign`
    pub assignments: Option<String>,
    pub menu_tty: Option<String>,
}

impl RunOptions {
    pub fn from_cli(cli: &Cli) -> Self {
        let assignments = match &cli.command {
            Some(crate::cli::Commands::Autologin { assign }) => assign.clone(),
            _ => cli.full_install.clone(),
        };
        Self {
            auto: cli.auto,
            debug: cli.debug,
            user: cli.user.clone(),
            url: cli.url.clone(),
            source: cli.source.clone(),
            channel: cli.channel.clone(),
            assignments,
            menu_tty: cli.menu_tty.clone(),
        }
    }

    pub fn interactive(&self) -> bool {
        !self.auto
    }
}

/// Settings plus options for one invocation.
#[derive(Debug, Clone)]
pub struct Context {
    pub settings: Settings,
    pub options: RunOptions,
}

impl Context {
    pub fn new(settings: Settings, options: RunOptions) -> Self {
        Self { settings, options }
    }

    /// Menu terminal from `--menu-tty`, defaulting to tty1.
    pub fn menu_terminal(&self) -> Result<TerminalId> {
        match &self.options.menu_tty {
            Some(tty) => tty.parse(),
            None => TerminalId::new(DEFAULT_MENU_TERMINAL),
        }
    }

    /// Session plan implied by the options, if any.
    ///
    /// An assignment string wins; otherwise `--user` with `--url` means one
    /// browser on tty2. Only one of the pair is a validation error.
    pub fn session_table(&self) -> Result<Option<SessionTable>> {
        let menu = self.menu_terminal()?;
        if let Some(spec) = &self.options.assignments {
            return SessionTable::parse(spec, menu).map(Some);
        }
        match (&self.options.user, &self.options.url) {
            (Some(user), Some(url)) => {
                let mut table = SessionTable::new(menu);
                let tty = TerminalId::new(DEFAULT_BROWSER_TERMINAL)?;
                table.assign(tty, user, url)?;
                Ok(Some(table))
            }
            (None, None) => Ok(None),
            _ => Err(KioskError::validation(
                "--user and --url must be given together",
            )),
        }
    }

    /// Update source: `--source` first, then settings.
    pub fn update_source(&self) -> Option<&str> {
        self.options
            .source
            .as_deref()
            .or(self.settings.update.source.as_deref())
    }

    /// Release channel: `--channel` first, then settings.
    pub fn channel(&self) -> &str {
        self.options
            .channel
            .as_deref()
            .unwrap_or(&self.settings.update.channel)
    }
}
