//! Settings file handling.
//!
//! Site-wide configuration lives in `/etc/mediascreen/settings.json`. Every
//! field has a default, so a missing file or a partial file both work; the
//! paths can be pointed at a scratch root for testing.

use crate::assignment::validate_url;
use crate::error::{KioskError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default location of the settings file.
pub const DEFAULT_SETTINGS_PATH: &str = "/etc/mediascreen/settings.json";

/// Filesystem locations ms-util reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Paths {
    /// Menu entries (`displayOrder,execOrder,name,description,actionRef`)
    pub menu_config: PathBuf,
    /// Directory holding collaborator scripts
    pub scripts_dir: PathBuf,
    /// Terminal → URL mapping read by kiosk sessions
    pub url_map: PathBuf,
    /// systemd unit directory receiving getty drop-ins
    pub systemd_dir: PathBuf,
    /// Home directory of root (menu profile)
    pub root_home: PathBuf,
    /// Installed ms-util binary (profiles exec it, updates replace it)
    pub install_path: PathBuf,
    /// Persistent log file
    pub log_file: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            menu_config: PathBuf::from("/etc/mediascreen/menu.conf"),
            scripts_dir: PathBuf::from("/opt/mediascreen/scripts"),
            url_map: PathBuf::from("/etc/mediascreen/tty-urls.conf"),
            systemd_dir: PathBuf::from("/etc/systemd/system"),
            root_home: PathBuf::from("/root"),
            install_path: PathBuf::from("/usr/local/bin/ms-util"),
            log_file: PathBuf::from("/var/log/mediascreen.log"),
        }
    }
}

/// Browser launched by kiosk sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub command: String,
    pub flags: Vec<String>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            command: "/usr/bin/chromium".to_string(),
            flags: vec![
                "--kiosk".to_string(),
                "--noerrdialogs".to_string(),
                "--disable-infobars".to_string(),
                "--no-first-run".to_string(),
            ],
        }
    }
}

/// Self-update source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateSettings {
    /// Base URL releases are published under; `--source` overrides it
    pub source: Option<String>,
    /// Release channel directory under the source
    pub channel: String,
    /// Download attempts for transient failures
    pub attempts: u32,
    /// Pause between attempts
    pub backoff_secs: u64,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            source: None,
            channel: "stable".to_string(),
            attempts: 3,
            backoff_secs: 2,
        }
    }
}

/// Site configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub paths: Paths,
    pub browser: BrowserSettings,
    pub update: UpdateSettings,
    /// URL a kiosk opens when its terminal has no mapping entry
    pub default_url: String,
    /// Collaborator script that counts as the autologin step
    pub autologin_action: String,
    /// Interactive reboot countdown after a full install
    pub reboot_countdown_secs: u64,
    /// Unattended delay before rebooting after a full install
    pub reboot_delay_secs: u64,
    /// `host:port` probed before a full install; `None` skips the wait
    pub connectivity_probe: Option<String>,
    pub connectivity_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            paths: Paths::default(),
            browser: BrowserSettings::default(),
            update: UpdateSettings::default(),
            default_url: "http://localhost/".to_string(),
            autologin_action: "autologin-setup.sh".to_string(),
            reboot_countdown_secs: 10,
            reboot_delay_secs: 5,
            connectivity_probe: Some("deb.debian.org:80".to_string()),
            connectivity_timeout_secs: 60,
        }
    }
}

impl Settings {
    /// Load settings; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => {
                let settings: Self = serde_json::from_str(&content)?;
                settings.validate()?;
                tracing::debug!("Loaded settings from {}", path.display());
                Ok(settings)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No settings at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_url(&self.default_url)?;
        if let Some(source) = &self.update.source {
            validate_url(source)?;
        }
        if self.update.channel.is_empty()
            || !self
                .update
                .channel
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(KioskError::validation(format!(
                "update.channel '{}' must be a simple name",
                self.update.channel
            )));
        }
        if self.update.attempts == 0 {
            return Err(KioskError::validation("update.attempts must be at least 1"));
        }
        if self.browser.command.trim().is_empty() {
            return Err(KioskError::validation("browser.command is empty"));
        }
        if let Some(probe) = &self.connectivity_probe {
            if !probe.contains(':') {
                return Err(KioskError::validation(format!(
                    "connectivity_probe '{}' must be host:port",
                    probe
                )));
            }
        }
        Ok(())
    }

    /// Settings rooted under `root`, for staging trees and tests.
    pub fn rooted_at(root: &Path) -> Self {
        let under = |p: &str| root.join(p.trim_start_matches('/'));
        let defaults = Paths::default();
        Self {
            paths: Paths {
                menu_config: under(&defaults.menu_config.to_string_lossy()),
                scripts_dir: under(&defaults.scripts_dir.to_string_lossy()),
                url_map: under(&defaults.url_map.to_string_lossy()),
                systemd_dir: under(&defaults.systemd_dir.to_string_lossy()),
                root_home: under(&defaults.root_home.to_string_lossy()),
                install_path: under(&defaults.install_path.to_string_lossy()),
                log_file: under(&defaults.log_file.to_string_lossy()),
            },
            ..Self::default()
        }
    }
}
