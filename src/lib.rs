//! MediaScreen kiosk library
//!
//! Core of `ms-util`: the menu runner, terminal session assignment, getty
//! autologin overrides, login profile generation and the self-update.

pub mod accounts;
pub mod assignment;
pub mod cli;
pub mod context;
pub mod error;
pub mod fsutil;
pub mod getty;
pub mod logging;
pub mod menu;
pub mod menu_config;
pub mod network;
pub mod process_guard;
pub mod profile;
pub mod prompt;
pub mod sanity;
pub mod script_runner;
pub mod script_traits;
pub mod scripts;
pub mod session;
pub mod settings;
pub mod terminal;
pub mod update;
pub mod url_map;
pub mod wait;

// Re-export main types for convenience
pub use assignment::{BrowserAssignment, SessionTable, TerminalRole};
pub use context::{Context, RunOptions};
pub use error::{ConfigError, KioskError};
pub use getty::{ReconcileOptions, ReconcileReport, ServiceManager, Systemctl, TerminalState};
pub use menu::{FullInstallReport, Host, MenuRunner, MenuServices, MenuState};
pub use menu_config::{ExecOrder, MenuEntry};
pub use process_guard::{ChildRegistry, CommandProcessGroup, ProcessGuard};
pub use script_runner::{ActionExecutor, OutputMode, ScriptExecutor, ScriptOutput, run_action, run_script_safe};
pub use script_traits::ScriptArgs;
pub use scripts::action::ActionArgs;
pub use settings::Settings;
pub use terminal::TerminalId;
pub use url_map::UrlMap;
pub use wait::{CancelToken, WaitOutcome};
