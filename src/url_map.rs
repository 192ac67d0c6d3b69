//! Terminal → URL mapping file.
//!
//! Written at configuration time, read by every kiosk launch script when its
//! session starts. One `ttyN=url` pair per line; when a terminal appears more
//! than once the last line wins.

use crate::error::{KioskError, Result};
use crate::fsutil;
use crate::terminal::TerminalId;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// In-memory form of the mapping file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlMap {
    entries: BTreeMap<TerminalId, String>,
}

impl UrlMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse mapping file content. Lines that do not name a managed terminal
    /// are skipped with a warning so one bad line never blanks every kiosk.
    pub fn parse(content: &str) -> Self {
        let mut entries = BTreeMap::new();
        for (idx, raw) in content.lines().enumerate() {
            let line = raw.trim_end_matches('\r').trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((tty, url)) = line.split_once('=') else {
                tracing::warn!("URL map line {} has no '=': {}", idx + 1, line);
                continue;
            };
            match tty.parse::<TerminalId>() {
                Ok(id) => {
                    entries.insert(id, url.trim().to_string());
                }
                Err(e) => tracing::warn!("URL map line {}: {}", idx + 1, e),
            }
        }
        Self { entries }
    }

    /// Load the mapping file; a missing file is an empty map.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Self::parse(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Render in file format, ordered by terminal.
    pub fn render(&self) -> String {
        let mut out = String::from("# Managed by ms-util: terminal=url\n");
        for (tty, url) in &self.entries {
            out.push_str(&format!("{}={}\n", tty, url));
        }
        out
    }

    /// Replace the file at `path`, keeping a timestamped copy of the old one.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(backup) = fsutil::backup_if_changed(path, &self.render())? {
            tracing::info!("Backed up previous URL map to {}", backup.display());
        }
        fsutil::write_atomic(path, self.render().as_bytes(), 0o644)?;
        tracing::info!("Wrote {} terminal URL(s) to {}", self.entries.len(), path.display());
        Ok(())
    }

    pub fn set(&mut self, tty: TerminalId, url: impl Into<String>) {
        self.entries.insert(tty, url.into());
    }

    pub fn remove(&mut self, tty: TerminalId) -> Option<String> {
        self.entries.remove(&tty)
    }

    pub fn get(&self, tty: TerminalId) -> Option<&str> {
        self.entries.get(&tty).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TerminalId, &str)> {
        self.entries.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

/// Resolve the URL a kiosk on `tty` should open, falling back to `default_url`.
///
/// Mirrors what the generated launch script does at session start.
pub fn resolve_url(map_path: &Path, tty: TerminalId, default_url: &str) -> Result<String> {
    let map = UrlMap::load(map_path)?;
    match map.get(tty) {
        Some(url) if !url.is_empty() => Ok(url.to_string()),
        _ => {
            tracing::warn!(
                "No URL mapped for {} in {}, using default {}",
                tty,
                map_path.display(),
                default_url
            );
            if default_url.is_empty() {
                return Err(KioskError::not_found(format!("no URL mapped for {}", tty)));
            }
            Ok(default_url.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tty(n: u8) -> TerminalId {
        TerminalId::new(n).unwrap()
    }

    #[test]
    fn test_last_write_wins() {
        let map = UrlMap::parse("tty3=https://a.example\ntty3=https://b.example\n");
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(tty(3)), Some("https://b.example"));
    }

    #[test]
    fn test_url_with_equals_sign() {
        let map = UrlMap::parse("tty2=https://example.com/?a=1&b=2\n");
        assert_eq!(map.get(tty(2)), Some("https://example.com/?a=1&b=2"));
    }

    #[test]
    fn test_bad_lines_skipped() {
        let map = UrlMap::parse("# header\ngarbage\ntty99=https://x\ntty4=http://ok\n");
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(tty(4)), Some("http://ok"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("etc/tty-urls.conf");

        let mut map = UrlMap::new();
        map.set(tty(5), "https://five.example");
        map.set(tty(3), "https://three.example");
        map.save(&path).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("tty3=https://three.example\ntty5=https://five.example\n"));
        assert_eq!(UrlMap::load(&path).unwrap(), map);
    }

    #[test]
    fn test_load_missing_is_empty() {
        let dir = TempDir::new().unwrap();
        let map = UrlMap::load(&dir.path().join("absent")).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn test_resolve_url_fallback() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("map");
        fs::write(&path, "tty3=https://example.com\n").unwrap();

        assert_eq!(
            resolve_url(&path, tty(3), "http://localhost/").unwrap(),
            "https://example.com"
        );
        assert_eq!(
            resolve_url(&path, tty(4), "http://localhost/").unwrap(),
            "http://localhost/"
        );
        assert!(resolve_url(&path, tty(4), "").is_err());
    }
}
