//! Session assignment table.
//!
//! Maps each virtual terminal to the session it runs: the root-owned menu on
//! exactly one terminal, and browser kiosks owned by named users on others.
//! Built from an assignment string such as
//! `alice:tty3:https://example.com,bob:5:http://intranet/board`.

use crate::error::{KioskError, Result};
use crate::terminal::{MAX_TERMINALS, TerminalId};
use crate::url_map::UrlMap;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Separator between entries of an assignment string.
pub const ENTRY_SEPARATOR: char = ',';

/// Separator between the fields of one entry.
pub const FIELD_SEPARATOR: char = ':';

/// Longest username Debian's `useradd` accepts.
pub const MAX_USERNAME_LEN: usize = 32;

/// Terminal that hosts the menu when none is given.
pub const DEFAULT_MENU_TERMINAL: u8 = 1;

/// Terminal used by the `--user/--url` shorthand.
pub const DEFAULT_BROWSER_TERMINAL: u8 = 2;

/// A browser kiosk session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserAssignment {
    pub user: String,
    pub url: String,
}

/// What runs on a terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalRole {
    /// The ms-util menu, logged in as root.
    Menu,
    /// A full-screen browser for `user`, pointed at `url`.
    Browser(BrowserAssignment),
}

impl TerminalRole {
    /// Account the terminal logs in automatically.
    pub fn login_user(&self) -> &str {
        match self {
            Self::Menu => "root",
            Self::Browser(b) => &b.user,
        }
    }
}

/// The complete terminal plan: one menu terminal plus browser terminals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTable {
    menu: TerminalId,
    browsers: BTreeMap<TerminalId, BrowserAssignment>,
}

/// Validate a kiosk account name: lowercase letter or underscore first,
/// then lowercase letters, digits, `_` or `-`.
pub fn validate_username(user: &str) -> Result<()> {
    if user.is_empty() {
        return Err(KioskError::validation("username is empty"));
    }
    if user.len() > MAX_USERNAME_LEN {
        return Err(KioskError::validation(format!(
            "username '{}' is longer than {} characters",
            user, MAX_USERNAME_LEN
        )));
    }
    let mut chars = user.chars();
    let first_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    let rest_ok = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if !first_ok || !rest_ok {
        return Err(KioskError::validation(format!(
            "username '{}' may only contain lowercase letters, digits, '_' and '-', and must start with a letter or '_'",
            user
        )));
    }
    if user == "root" {
        return Err(KioskError::validation("browser sessions cannot run as root"));
    }
    Ok(())
}

/// Validate a kiosk URL: `http://` or `https://` followed by a host.
pub fn validate_url(url: &str) -> Result<()> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| {
            KioskError::validation(format!("URL '{}' must start with http:// or https://", url))
        })?;
    let host = rest.split(['/', '?', '#']).next().unwrap_or("");
    if host.is_empty() {
        return Err(KioskError::validation(format!("URL '{}' has no host", url)));
    }
    if url.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(KioskError::validation(format!(
            "URL '{}' contains whitespace or control characters",
            url
        )));
    }
    Ok(())
}

impl SessionTable {
    /// A table with only the menu terminal assigned.
    pub fn new(menu: TerminalId) -> Self {
        Self {
            menu,
            browsers: BTreeMap::new(),
        }
    }

    /// Parse an assignment string against the given menu terminal.
    ///
    /// Each entry is split on the first two `:`; everything after the second
    /// is the URL, so `https://host:8080/` survives intact.
    pub fn parse(spec: &str, menu: TerminalId) -> Result<Self> {
        let entries: Vec<&str> = spec
            .split(ENTRY_SEPARATOR)
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .collect();

        let limit = usize::from(MAX_TERMINALS) - 1;
        if entries.len() > limit {
            return Err(KioskError::validation(format!(
                "{} browser assignments given, at most {} terminals are available",
                entries.len(),
                limit
            )));
        }

        let mut table = Self::new(menu);
        for entry in entries {
            let mut fields = entry.splitn(3, FIELD_SEPARATOR);
            let (Some(user), Some(tty), Some(url)) = (fields.next(), fields.next(), fields.next())
            else {
                return Err(KioskError::validation(format!(
                    "assignment '{}' must have the form user:terminal:url",
                    entry
                )));
            };
            let tty: TerminalId = tty.parse()?;
            table.assign(tty, user.trim(), url.trim())?;
        }
        Ok(table)
    }

    /// Add a browser session, validating it against the current table.
    pub fn assign(&mut self, tty: TerminalId, user: &str, url: &str) -> Result<()> {
        if tty == self.menu {
            return Err(KioskError::validation(format!(
                "{} is reserved for the menu",
                tty
            )));
        }
        validate_username(user)?;
        validate_url(url)?;
        if self.browsers.contains_key(&tty) {
            return Err(KioskError::state_conflict(format!(
                "{} is assigned more than once",
                tty
            )));
        }
        self.browsers.insert(
            tty,
            BrowserAssignment {
                user: user.to_string(),
                url: url.to_string(),
            },
        );
        Ok(())
    }

    pub fn menu_terminal(&self) -> TerminalId {
        self.menu
    }

    /// Role of `tty`, or `None` when the terminal is unused.
    pub fn role(&self, tty: TerminalId) -> Option<TerminalRole> {
        if tty == self.menu {
            return Some(TerminalRole::Menu);
        }
        self.browsers.get(&tty).cloned().map(TerminalRole::Browser)
    }

    /// Every assigned terminal with its role, menu included, ascending.
    pub fn roles(&self) -> Vec<(TerminalId, TerminalRole)> {
        TerminalId::all()
            .filter_map(|tty| self.role(tty).map(|role| (tty, role)))
            .collect()
    }

    /// Browser sessions in terminal order.
    pub fn browsers(&self) -> impl Iterator<Item = (TerminalId, &BrowserAssignment)> {
        self.browsers.iter().map(|(k, v)| (*k, v))
    }

    /// Terminals with any session (menu included).
    pub fn assigned_terminals(&self) -> BTreeSet<TerminalId> {
        let mut set: BTreeSet<TerminalId> = self.browsers.keys().copied().collect();
        set.insert(self.menu);
        set
    }

    /// Distinct browser users.
    pub fn usernames(&self) -> BTreeSet<String> {
        self.browsers.values().map(|b| b.user.clone()).collect()
    }

    /// Terminals owned by `user`.
    pub fn terminals_of(&self, user: &str) -> Vec<TerminalId> {
        self.browsers
            .iter()
            .filter(|(_, b)| b.user == user)
            .map(|(tty, _)| *tty)
            .collect()
    }

    pub fn browser_count(&self) -> usize {
        self.browsers.len()
    }

    /// Canonical assignment string, ordered by terminal.
    pub fn to_spec_string(&self) -> String {
        self.browsers
            .iter()
            .map(|(tty, b)| format!("{}:{}:{}", b.user, tty, b.url))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Mapping file content for this table.
    pub fn url_map(&self) -> UrlMap {
        let mut map = UrlMap::new();
        for (tty, b) in &self.browsers {
            map.set(*tty, b.url.clone());
        }
        map
    }
}

impl fmt::Display for SessionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<6} menu (root)", self.menu.to_string())?;
        for (tty, b) in &self.browsers {
            writeln!(f, "{:<6} browser ({}) -> {}", tty.to_string(), b.user, b.url)?;
        }
        Ok(())
    }
}
