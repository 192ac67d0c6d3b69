//! Menu configuration loader.
//!
//! The menu file lists one entry per line:
//!
//! ```text
//! displayOrder,execOrder,name,description,actionRef
//! 1,1,Network,Configure network,net.sh
//! 3,_,Diag,Manual diagnostic,diag.sh
//! ```
//!
//! An `execOrder` ending in `_` marks the entry manual-only; it is listed in
//! the menu but never run by a full install. Loading is all-or-nothing: one
//! malformed line rejects the whole file.
//!
//! Whitespace around every field is dropped, so `1, 1, Network ,...` loads
//! the name `Network`. Fields cannot carry leading or trailing blanks, and a
//! name of only spaces counts as empty.

use crate::error::ConfigError;
use std::fmt;
use std::fs;
use std::path::{Component, Path};

/// Field delimiter of the menu file.
pub const DELIMITER: char = ',';

/// Marker suffix for entries excluded from unattended runs.
pub const MANUAL_MARKER: char = '_';

/// Prefix of action references handled inside ms-util instead of a script.
pub const BUILTIN_PREFIX: char = '@';

/// When an entry runs during a full install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOrder {
    /// Runs at this position during a full install.
    Step(u32),
    /// Only runs when picked from the menu. The number, if any, is kept for display.
    ManualOnly(Option<u32>),
}

impl ExecOrder {
    fn parse(field: &str) -> Option<Self> {
        if let Some(digits) = field.strip_suffix(MANUAL_MARKER) {
            if digits.is_empty() {
                return Some(Self::ManualOnly(None));
            }
            return parse_digits(digits).map(|n| Self::ManualOnly(Some(n)));
        }
        parse_digits(field).map(Self::Step)
    }

    /// Position in the unattended run, or `None` for manual-only entries.
    pub fn step(self) -> Option<u32> {
        match self {
            Self::Step(n) => Some(n),
            Self::ManualOnly(_) => None,
        }
    }

    pub fn is_manual_only(self) -> bool {
        matches!(self, Self::ManualOnly(_))
    }
}

impl fmt::Display for ExecOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Step(n) => write!(f, "{}", n),
            Self::ManualOnly(Some(n)) => write!(f, "{}{}", n, MANUAL_MARKER),
            Self::ManualOnly(None) => write!(f, "{}", MANUAL_MARKER),
        }
    }
}

/// One line of the menu file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuEntry {
    pub display_order: u32,
    pub exec_order: ExecOrder,
    pub name: String,
    pub description: String,
    pub action_ref: String,
}

impl MenuEntry {
    /// True when the action is implemented by ms-util itself (`@name`).
    pub fn is_builtin(&self) -> bool {
        self.action_ref.starts_with(BUILTIN_PREFIX)
    }

    /// Render back to the on-disk line format.
    pub fn to_line(&self) -> String {
        format!(
            "{},{},{},{},{}",
            self.display_order, self.exec_order, self.name, self.description, self.action_ref
        )
    }
}

fn parse_digits(s: &str) -> Option<u32> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn valid_action_ref(action: &str) -> Result<(), String> {
    if action.is_empty() {
        return Err("action reference is empty".into());
    }
    if let Some(bad) = action
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/' | '@')))
    {
        return Err(format!("action reference contains invalid character '{}'", bad));
    }
    let path = Path::new(action);
    if path.is_absolute() {
        return Err("action reference must be relative to the scripts directory".into());
    }
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err("action reference must not contain '..'".into());
    }
    Ok(())
}

/// Parse a single configuration line (without its line terminator).
pub fn parse_line(raw: &str) -> Result<MenuEntry, String> {
    let line = raw.trim_end_matches('\r');
    let fields: Vec<&str> = line.split(DELIMITER).map(str::trim).collect();
    if fields.len() != 5 {
        return Err(format!("expected 5 fields, found {}", fields.len()));
    }

    let display_order = parse_digits(fields[0])
        .ok_or_else(|| format!("display order '{}' is not a number", fields[0]))?;
    let exec_order = ExecOrder::parse(fields[1]).ok_or_else(|| {
        format!(
            "exec order '{}' must be a number or end with '{}'",
            fields[1], MANUAL_MARKER
        )
    })?;
    if fields[2].is_empty() {
        return Err("name is empty".into());
    }
    valid_action_ref(fields[4])?;

    Ok(MenuEntry {
        display_order,
        exec_order,
        name: fields[2].to_string(),
        description: fields[3].to_string(),
        action_ref: fields[4].to_string(),
    })
}

/// Parse menu file content. Blank lines and `#` comments are skipped.
pub fn parse(content: &str, origin: &str) -> Result<Vec<MenuEntry>, ConfigError> {
    let mut entries = Vec::new();
    for (idx, raw) in content.lines().enumerate() {
        let stripped = raw.trim_end_matches('\r').trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }
        let entry = parse_line(raw).map_err(|reason| ConfigError::InvalidLine {
            line: idx + 1,
            reason,
        })?;
        entries.push(entry);
    }
    if entries.is_empty() {
        return Err(ConfigError::Empty(origin.to_string()));
    }
    Ok(entries)
}

/// Load the menu file at `path`.
pub fn load(path: &Path) -> Result<Vec<MenuEntry>, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::Missing(path.display().to_string()));
    }
    let content = fs::read_to_string(path)?;
    let entries = parse(&content, &path.display().to_string())?;
    tracing::debug!("Loaded {} menu entries from {}", entries.len(), path.display());
    Ok(entries)
}

/// Entries in menu listing order (stable by display order).
pub fn display_order(entries: &[MenuEntry]) -> Vec<&MenuEntry> {
    let mut sorted: Vec<&MenuEntry> = entries.iter().collect();
    sorted.sort_by_key(|e| e.display_order);
    sorted
}

/// Entries a full install runs, in order. Manual-only entries are dropped;
/// equal steps keep file order.
pub fn execution_plan(entries: &[MenuEntry]) -> Vec<&MenuEntry> {
    let mut plan: Vec<&MenuEntry> = entries
        .iter()
        .filter(|e| !e.exec_order.is_manual_only())
        .collect();
    plan.sort_by_key(|e| e.exec_order.step());
    plan
}
