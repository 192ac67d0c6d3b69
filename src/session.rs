//! Session setup: turns a [`SessionTable`] into a configured machine.
//!
//! This is the autologin step. It is safe to re-run: every file it writes
//! is replaced in place, and terminals dropped from the table are cleared
//! and masked by the reconcile pass.

use crate::accounts::{Account, AccountDirectory};
use crate::assignment::SessionTable;
use crate::error::Result;
use crate::getty::{self, OverrideWrite, ReconcileOptions, ReconcileReport, ServiceManager};
use crate::profile::{self, BrowserProfileWrite, ProfileWrite};
use crate::settings::Settings;
use tracing::info;

/// Everything one session setup touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub accounts: Vec<Account>,
    pub menu_profile: ProfileWrite,
    pub browser_profiles: Vec<BrowserProfileWrite>,
    pub overrides: Vec<OverrideWrite>,
    pub reconcile: ReconcileReport,
}

/// Apply `table`: accounts, mapping file, profiles, overrides, then units.
pub fn apply_session_plan(
    settings: &Settings,
    table: &SessionTable,
    units: &mut dyn ServiceManager,
    accounts: &mut dyn AccountDirectory,
    options: ReconcileOptions,
) -> Result<SessionReport> {
    info!("Applying session plan:\n{}", table);

    let mut resolved = Vec::new();
    for user in table.usernames() {
        resolved.push(accounts.ensure(&user)?);
    }

    // The map mirrors the table exactly, so removed terminals lose their entry
    table.url_map().save(&settings.paths.url_map)?;

    let menu_profile = profile::install_menu_profile(settings, table.menu_terminal())?;
    let mut browser_profiles = Vec::new();
    for account in &resolved {
        let terminals = table.terminals_of(&account.name);
        browser_profiles.push(profile::install_browser_profile(settings, account, &terminals)?);
    }

    let mut overrides = Vec::new();
    for (tty, role) in table.roles() {
        overrides.push(getty::apply(&settings.paths.systemd_dir, tty, &role)?);
    }

    let reconcile = getty::reconcile(units, &settings.paths.systemd_dir, table, options)?;
    info!(
        "Session plan applied: {} enabled, {} masked",
        reconcile.enabled().len(),
        reconcile.masked().len()
    );

    Ok(SessionReport {
        accounts: resolved,
        menu_profile,
        browser_profiles,
        overrides,
        reconcile,
    })
}
