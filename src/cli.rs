use clap::{Parser, Subcommand};
use std::ffi::OsString;
use std::path::PathBuf;

/// ms-util - MediaScreen kiosk provisioning menu
#[derive(Parser, Debug)]
#[command(name = "ms-util")]
#[command(about = "Provision and maintain a multi-terminal browser kiosk")]
#[command(version)]
pub struct Cli {
    /// Run unattended: never prompt, skip manual-only steps.
    ///
    /// Without a subcommand this performs a full install.
    #[arg(short, long, global = true)]
    pub auto: bool,

    /// Kiosk user for the browser session
    #[arg(short, long, global = true)]
    pub user: Option<String>,

    /// URL the browser session opens
    #[arg(short = 'w', long, global = true)]
    pub url: Option<String>,

    /// Alternate source location for downloads and updates
    #[arg(short, long, global = true)]
    pub source: Option<String>,

    /// Verbose logging, also passed on to every action script
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Alternate release channel for updates (e.g. "beta")
    #[arg(long, global = true)]
    pub channel: Option<String>,

    /// Run every step in order, then reboot.
    ///
    /// Takes the browser assignments as `user:tty:url[,user:tty:url...]`.
    #[arg(short, long, value_name = "ASSIGNMENTS")]
    pub full_install: Option<String>,

    /// Terminal that runs the menu (default tty1)
    #[arg(short, long, value_name = "TTY", global = true)]
    pub menu_tty: Option<String>,

    /// Settings file
    #[arg(long, global = true, default_value = "/etc/mediascreen/settings.json")]
    pub settings: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the interactive menu (default)
    Menu,
    /// Configure terminal autologin and kiosk sessions
    Autologin {
        /// Browser assignments, `user:tty:url[,user:tty:url...]`
        #[arg(long, value_name = "ASSIGNMENTS")]
        assign: Option<String>,
    },
    /// Print the URL the kiosk on a terminal opens
    KioskUrl {
        /// Terminal to resolve (defaults to the current one)
        #[arg(long)]
        tty: Option<String>,
    },
    /// Validate a menu configuration file
    Validate {
        /// Menu file (defaults to the configured one)
        config: Option<PathBuf>,
    },
    /// Show terminal assignments and login unit states
    Status,
    /// Download the latest ms-util and restart into it
    Update,
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }

    /// Arguments for restarting into a freshly installed binary.
    ///
    /// Only the session-wide flags carry over. The subcommand, `--auto` and
    /// `--full-install` are dropped so the new process opens the menu.
    pub fn relaunch_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        if self.debug {
            args.push("--debug".into());
        }
        let valued = [
            ("--user", &self.user),
            ("--url", &self.url),
            ("--source", &self.source),
            ("--channel", &self.channel),
            ("--menu-tty", &self.menu_tty),
        ];
        for (flag, value) in valued {
            if let Some(value) = value {
                args.push(flag.into());
                args.push(value.into());
            }
        }
        args.push("--settings".into());
        args.push(self.settings.clone().into_os_string());
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_no_args() {
        let cli = Cli::try_parse_from(["ms-util"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.auto);
        assert!(cli.full_install.is_none());
    }

    #[test]
    fn test_cli_full_install() {
        let cli = Cli::try_parse_from([
            "ms-util",
            "--auto",
            "--full-install",
            "alice:tty3:https://example.com",
            "--menu-tty",
            "tty12",
        ])
        .unwrap();
        assert!(cli.auto);
        assert_eq!(cli.full_install.as_deref(), Some("alice:tty3:https://example.com"));
        assert_eq!(cli.menu_tty.as_deref(), Some("tty12"));
    }

    #[test]
    fn test_cli_short_flags() {
        let cli = Cli::try_parse_from([
            "ms-util", "-a", "-d", "-u", "kiosk", "-w", "https://x.example", "-s",
            "https://mirror.example",
        ])
        .unwrap();
        assert!(cli.auto && cli.debug);
        assert_eq!(cli.user.as_deref(), Some("kiosk"));
        assert_eq!(cli.url.as_deref(), Some("https://x.example"));
        assert_eq!(cli.source.as_deref(), Some("https://mirror.example"));
    }

    #[test]
    fn test_cli_autologin_subcommand() {
        let cli = Cli::try_parse_from([
            "ms-util",
            "autologin",
            "--assign",
            "bob:5:http://b.example",
            "--menu-tty",
            "2",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Autologin { assign }) => {
                assert_eq!(assign.as_deref(), Some("bob:5:http://b.example"));
            }
            other => panic!("Expected Autologin command, got {other:?}"),
        }
        assert_eq!(cli.menu_tty.as_deref(), Some("2"));
    }

    #[test]
    fn test_cli_validate_command() {
        let cli = Cli::try_parse_from(["ms-util", "validate", "/tmp/menu.conf"]).unwrap();
        match cli.command {
            Some(Commands::Validate { config }) => {
                assert_eq!(config.unwrap().to_str().unwrap(), "/tmp/menu.conf");
            }
            _ => panic!("Expected Validate command"),
        }
    }

    #[test]
    fn test_relaunch_args_drop_subcommand() {
        let cli = Cli::try_parse_from([
            "ms-util",
            "--settings",
            "/tmp/s.json",
            "--source",
            "http://127.0.0.1:18777",
            "-d",
            "update",
        ])
        .unwrap();
        assert!(matches!(cli.command, Some(Commands::Update)));

        let args = cli.relaunch_args();
        let expected: Vec<OsString> = [
            "--debug",
            "--source",
            "http://127.0.0.1:18777",
            "--settings",
            "/tmp/s.json",
        ]
        .iter()
        .map(OsString::from)
        .collect();
        assert_eq!(args, expected);

        // The relaunched process must land in the menu, not in another update
        let relaunched = Cli::try_parse_from(std::iter::once(OsString::from("ms-util")).chain(args)).unwrap();
        assert!(relaunched.command.is_none());
        assert!(!relaunched.auto);
        assert!(relaunched.full_install.is_none());
        assert_eq!(relaunched.source.as_deref(), Some("http://127.0.0.1:18777"));
    }

    #[test]
    fn test_relaunch_args_never_repeat_full_install() {
        let cli = Cli::try_parse_from([
            "ms-util",
            "--auto",
            "--full-install",
            "alice:tty3:https://example.com",
            "--menu-tty",
            "tty12",
        ])
        .unwrap();
        let args = cli.relaunch_args();
        assert!(!args.iter().any(|a| a == "--auto" || a == "--full-install"));
        assert!(args.iter().any(|a| a == "tty12"));
        assert_eq!(args.last().map(OsString::as_os_str), Some(std::ffi::OsStr::new("/etc/mediascreen/settings.json")));
    }

    #[test]
    fn test_cli_kiosk_url() {
        let cli = Cli::try_parse_from(["ms-util", "kiosk-url", "--tty", "tty4"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::KioskUrl { tty: Some(_) })));
    }
}
