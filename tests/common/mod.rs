//! Fakes shared by the integration test binaries.

#![allow(dead_code)]

use mediascreen::accounts::{Account, AccountDirectory};
use mediascreen::error::{KioskError, Result};
use mediascreen::getty::ServiceManager;
use mediascreen::menu::Host;
use mediascreen::update::Fetch;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Unit states held in memory; every call is recorded.
#[derive(Default)]
pub struct RecordingUnits {
    pub enabled: HashMap<String, String>,
    pub active: HashMap<String, bool>,
    pub calls: Vec<String>,
}

impl ServiceManager for RecordingUnits {
    fn daemon_reload(&mut self) -> Result<()> {
        self.calls.push("daemon-reload".into());
        Ok(())
    }

    fn unmask(&mut self, unit: &str) -> Result<()> {
        self.calls.push(format!("unmask {}", unit));
        self.enabled.insert(unit.into(), "disabled".into());
        Ok(())
    }

    fn enable(&mut self, unit: &str) -> Result<()> {
        self.calls.push(format!("enable {}", unit));
        self.enabled.insert(unit.into(), "enabled".into());
        Ok(())
    }

    fn restart(&mut self, unit: &str) -> Result<()> {
        self.calls.push(format!("restart {}", unit));
        self.active.insert(unit.into(), true);
        Ok(())
    }

    fn stop(&mut self, unit: &str) -> Result<()> {
        self.calls.push(format!("stop {}", unit));
        self.active.insert(unit.into(), false);
        Ok(())
    }

    fn mask(&mut self, unit: &str) -> Result<()> {
        self.calls.push(format!("mask {}", unit));
        self.enabled.insert(unit.into(), "masked".into());
        self.active.insert(unit.into(), false);
        Ok(())
    }

    fn is_enabled(&mut self, unit: &str) -> Result<String> {
        Ok(self.enabled.get(unit).cloned().unwrap_or_else(|| "disabled".into()))
    }

    fn is_active(&mut self, unit: &str) -> Result<bool> {
        Ok(self.active.get(unit).copied().unwrap_or(false))
    }
}

/// Accounts created under the staging tree, owned by the test user.
pub struct MemoryAccounts {
    homes: PathBuf,
    known: HashMap<String, Account>,
}

impl MemoryAccounts {
    pub fn new(homes: &Path) -> Self {
        Self {
            homes: homes.to_path_buf(),
            known: HashMap::new(),
        }
    }
}

impl AccountDirectory for MemoryAccounts {
    fn lookup(&self, name: &str) -> Result<Option<Account>> {
        Ok(self.known.get(name).cloned())
    }

    fn create(&mut self, name: &str) -> Result<Account> {
        let home = self.homes.join(name);
        fs::create_dir_all(&home)?;
        let account = Account {
            name: name.to_string(),
            home,
            uid: nix::unistd::getuid().as_raw(),
            gid: nix::unistd::getgid().as_raw(),
        };
        self.known.insert(name.to_string(), account.clone());
        Ok(account)
    }
}

pub struct NoDownloads;

impl Fetch for NoDownloads {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        Err(KioskError::not_found(url.to_string()))
    }
}

#[derive(Default)]
pub struct RecordingHost {
    pub preflights: usize,
    pub reboots: usize,
    pub shells: usize,
    pub relaunched: Vec<PathBuf>,
    /// Error message returned by `preflight`
    pub preflight_error: Option<String>,
    /// Error message returned by `reboot`
    pub reboot_error: Option<String>,
}

impl Host for RecordingHost {
    fn preflight(&mut self) -> Result<()> {
        self.preflights += 1;
        match &self.preflight_error {
            Some(msg) => Err(KioskError::system(msg.clone())),
            None => Ok(()),
        }
    }

    fn reboot(&mut self) -> Result<()> {
        if let Some(msg) = &self.reboot_error {
            return Err(KioskError::system(msg.clone()));
        }
        self.reboots += 1;
        Ok(())
    }

    fn open_shell(&mut self) -> Result<()> {
        self.shells += 1;
        Ok(())
    }

    fn relaunch(&mut self, program: &Path) -> Result<()> {
        self.relaunched.push(program.to_path_buf());
        Ok(())
    }
}

/// Serves fixed bodies by URL prefix; anything else is a 404.
#[derive(Default)]
pub struct ScriptedFetch {
    pub releases: Vec<(String, Vec<u8>)>,
    pub requested: RefCell<Vec<String>>,
}

impl ScriptedFetch {
    pub fn serving(prefix: &str, body: &[u8]) -> Self {
        Self {
            releases: vec![(prefix.to_string(), body.to_vec())],
            requested: RefCell::new(Vec::new()),
        }
    }
}

impl Fetch for ScriptedFetch {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.requested.borrow_mut().push(url.to_string());
        self.releases
            .iter()
            .find(|(prefix, _)| url.starts_with(prefix.as_str()))
            .map(|(_, body)| body.clone())
            .ok_or_else(|| KioskError::not_found(url.to_string()))
    }
}
