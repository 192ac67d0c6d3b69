//! Type-safe arguments for menu action scripts.
//!
//! Every script named in the menu configuration receives the same flag set,
//! so one struct covers them all. The action reference itself comes from
//! the configuration file rather than a constant.

use crate::assignment::SessionTable;
use crate::context::Context;
use crate::script_traits::ScriptArgs;
use crate::terminal::TerminalId;
use std::path::PathBuf;

/// Environment variable carrying the terminal→URL mapping file path.
pub const ENV_URL_MAP: &str = "MEDIASCREEN_URL_MAP";
/// Environment variable carrying the menu terminal (`ttyN`).
pub const ENV_MENU_TTY: &str = "MEDIASCREEN_MENU_TTY";
/// Environment variable carrying the canonical assignment string.
pub const ENV_ASSIGNMENTS: &str = "MEDIASCREEN_ASSIGNMENTS";

/// Arguments handed to one action script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionArgs {
    /// Reference relative to the scripts directory (e.g. `net.sh`).
    pub action_ref: String,
    /// Run without prompting.
    pub auto: bool,
    pub debug: bool,
    /// Alternate source location for downloads.
    pub source: Option<String>,
    pub user: Option<String>,
    pub url: Option<String>,
    pub channel: Option<String>,
    pub url_map: Option<PathBuf>,
    pub menu_tty: Option<TerminalId>,
    /// Canonical assignment string of the active session plan.
    pub assignments: Option<String>,
}

impl ActionArgs {
    pub fn new(action_ref: impl Into<String>) -> Self {
        Self {
            action_ref: action_ref.into(),
            ..Self::default()
        }
    }

    pub fn auto(mut self, auto: bool) -> Self {
        self.auto = auto;
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Arguments for `action_ref` carrying the flags of the current run.
    pub fn from_context(
        action_ref: impl Into<String>,
        ctx: &Context,
        session: Option<&SessionTable>,
    ) -> Self {
        let opts = &ctx.options;
        Self {
            action_ref: action_ref.into(),
            auto: opts.auto,
            debug: opts.debug,
            source: ctx.update_source().map(str::to_string),
            user: opts.user.clone(),
            url: opts.url.clone(),
            channel: opts.channel.clone(),
            url_map: Some(ctx.settings.paths.url_map.clone()),
            menu_tty: session
                .map(SessionTable::menu_terminal)
                .or_else(|| ctx.menu_terminal().ok()),
            assignments: session.map(SessionTable::to_spec_string),
        }
    }
}

impl ScriptArgs for ActionArgs {
    fn to_cli_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.auto {
            args.push("--auto".to_string());
        }
        if self.debug {
            args.push("--debug".to_string());
        }
        if let Some(ref source) = self.source {
            args.push("--source".to_string());
            args.push(source.clone());
        }
        if let Some(ref user) = self.user {
            args.push("--user".to_string());
            args.push(user.clone());
        }
        if let Some(ref url) = self.url {
            args.push("--url".to_string());
            args.push(url.clone());
        }
        if let Some(ref channel) = self.channel {
            args.push("--channel".to_string());
            args.push(channel.clone());
        }
        args
    }

    fn get_env_vars(&self) -> Vec<(String, String)> {
        let mut env = Vec::new();
        if let Some(ref map) = self.url_map {
            env.push((ENV_URL_MAP.to_string(), map.display().to_string()));
        }
        if let Some(tty) = self.menu_tty {
            env.push((ENV_MENU_TTY.to_string(), tty.to_string()));
        }
        if let Some(ref assignments) = self.assignments {
            env.push((ENV_ASSIGNMENTS.to_string(), assignments.clone()));
        }
        env
    }

    fn script_name(&self) -> &str {
        &self.action_ref
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunOptions;
    use crate::settings::Settings;

    #[test]
    fn test_flags_only_when_set() {
        let args = ActionArgs::new("net.sh");
        assert!(args.to_cli_args().is_empty());
        assert!(args.get_env_vars().is_empty());
        assert_eq!(args.script_name(), "net.sh");
    }

    #[test]
    fn test_full_flag_order() {
        let args = ActionArgs {
            action_ref: "browser.sh".into(),
            auto: true,
            debug: true,
            source: Some("https://mirror.example".into()),
            user: Some("kiosk".into()),
            url: Some("https://board.example".into()),
            channel: Some("beta".into()),
            ..ActionArgs::default()
        };
        assert_eq!(
            args.to_cli_args(),
            [
                "--auto",
                "--debug",
                "--source",
                "https://mirror.example",
                "--user",
                "kiosk",
                "--url",
                "https://board.example",
                "--channel",
                "beta"
            ]
        );
    }

    #[test]
    fn test_from_context_carries_session() {
        let options = RunOptions {
            auto: true,
            ..RunOptions::default()
        };
        let ctx = Context::new(Settings::default(), options);
        let menu = TerminalId::new(12).unwrap();
        let table = SessionTable::parse("alice:tty3:https://example.com", menu).unwrap();

        let args = ActionArgs::from_context("browser.sh", &ctx, Some(&table));
        assert_eq!(args.to_cli_args(), ["--auto"]);
        let env = args.get_env_vars();
        assert!(env.contains(&(ENV_MENU_TTY.to_string(), "tty12".to_string())));
        assert!(env.contains(&(
            ENV_ASSIGNMENTS.to_string(),
            "alice:tty3:https://example.com".to_string()
        )));
        assert!(env.iter().any(|(k, v)| k == ENV_URL_MAP && v.ends_with("tty-urls.conf")));
    }

    #[test]
    fn test_from_context_without_session_uses_menu_tty() {
        let ctx = Context::new(Settings::default(), RunOptions::default());
        let args = ActionArgs::from_context("diag.sh", &ctx, None);
        assert_eq!(args.menu_tty, TerminalId::new(1).ok());
        assert!(args.assignments.is_none());
    }
}
