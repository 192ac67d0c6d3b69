//! Kiosk user accounts.
//!
//! Browser sessions log in as ordinary users. Missing accounts are created
//! with a home directory and the groups X needs on a bare console.

use crate::error::{KioskError, Result};
use crate::process_guard::CommandProcessGroup;
use nix::unistd::User;
use std::path::PathBuf;
use std::process::Command;
use tracing::info;

/// Supplementary groups for kiosk users.
pub const KIOSK_GROUPS: &[&str] = &["video", "audio", "input"];

/// Login shell for kiosk users; the generated profile is bash-specific.
pub const KIOSK_SHELL: &str = "/bin/bash";

/// A resolved account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub name: String,
    pub home: PathBuf,
    pub uid: u32,
    pub gid: u32,
}

impl From<User> for Account {
    fn from(user: User) -> Self {
        Self {
            name: user.name,
            home: user.dir,
            uid: user.uid.as_raw(),
            gid: user.gid.as_raw(),
        }
    }
}

/// Seam over the passwd database.
pub trait AccountDirectory {
    fn lookup(&self, name: &str) -> Result<Option<Account>>;

    fn create(&mut self, name: &str) -> Result<Account>;

    /// Existing account, or a newly created one.
    fn ensure(&mut self, name: &str) -> Result<Account> {
        match self.lookup(name)? {
            Some(account) => Ok(account),
            None => self.create(name),
        }
    }
}

/// The host's accounts, via `getpwnam` and `useradd`.
#[derive(Debug, Default, Clone)]
pub struct SystemAccounts;

impl AccountDirectory for SystemAccounts {
    fn lookup(&self, name: &str) -> Result<Option<Account>> {
        User::from_name(name)
            .map(|u| u.map(Account::from))
            .map_err(|e| KioskError::system(format!("passwd lookup for {} failed: {}", name, e)))
    }

    fn create(&mut self, name: &str) -> Result<Account> {
        info!("Creating kiosk user {}", name);
        let output = Command::new("useradd")
            .args(["-m", "-s", KIOSK_SHELL, "-G", &KIOSK_GROUPS.join(","), name])
            .in_new_process_group()
            .output()
            .map_err(|e| KioskError::system(format!("failed to run useradd: {}", e)))?;
        if !output.status.success() {
            return Err(KioskError::system(format!(
                "useradd {} failed: {}",
                name,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        self.lookup(name)?
            .ok_or_else(|| KioskError::system(format!("user {} missing after useradd", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Memory {
        users: Vec<Account>,
        created: Vec<String>,
    }

    impl AccountDirectory for Memory {
        fn lookup(&self, name: &str) -> Result<Option<Account>> {
            Ok(self.users.iter().find(|a| a.name == name).cloned())
        }

        fn create(&mut self, name: &str) -> Result<Account> {
            self.created.push(name.to_string());
            let account = Account {
                name: name.to_string(),
                home: PathBuf::from("/home").join(name),
                uid: 1000 + self.users.len() as u32,
                gid: 1000 + self.users.len() as u32,
            };
            self.users.push(account.clone());
            Ok(account)
        }
    }

    #[test]
    fn test_ensure_creates_once() {
        let mut dir = Memory {
            users: vec![],
            created: vec![],
        };
        let first = dir.ensure("kiosk").unwrap();
        let second = dir.ensure("kiosk").unwrap();
        assert_eq!(first, second);
        assert_eq!(dir.created, ["kiosk"]);
    }

    #[test]
    fn test_system_lookup_root() {
        let root = SystemAccounts.lookup("root").unwrap().unwrap();
        assert_eq!(root.uid, 0);
        assert!(SystemAccounts.lookup("no_such_kiosk_user").unwrap().is_none());
    }
}
