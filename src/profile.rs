//! Per-session shell profile generator
//!
//! Login profiles decide what an autologin session does:
//!
//! - Root's profile on the menu terminal execs the installed ms-util
//! - A kiosk user's profile on one of its terminals execs `kiosk-launch`
//!
//! `kiosk-launch` looks up its terminal's URL in the mapping file each time
//! it starts, so changing a URL never requires regenerating profiles.
//!
//! Generated text lives between marker lines. Anything the operator wrote
//! outside the markers is kept.

use crate::accounts::Account;
use crate::error::{KioskError, Result};
use crate::fsutil::{self, shell_quote};
use crate::settings::Settings;
use crate::terminal::TerminalId;
use nix::unistd::{Gid, Uid, chown};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const BLOCK_BEGIN: &str = "# >>> ms-util managed block >>>";
pub const BLOCK_END: &str = "# <<< ms-util managed block <<<";

pub const PROFILE_FILE: &str = ".bash_profile";

/// Launcher location relative to the user's home.
pub const LAUNCHER_PATH: &str = ".local/bin/kiosk-launch";

/// Outcome of writing one generated file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileWrite {
    pub path: PathBuf,
    pub backup: Option<PathBuf>,
    pub changed: bool,
}

/// Replace the managed block in `existing` with `body`, or append one.
pub fn replace_block(existing: &str, body: &str) -> String {
    let block = format!("{}\n{}\n{}\n", BLOCK_BEGIN, body.trim_end(), BLOCK_END);
    let begin = existing.find(BLOCK_BEGIN);
    let end = existing.find(BLOCK_END);

    match (begin, end) {
        (Some(b), Some(e)) if b < e => {
            let mut after = &existing[e + BLOCK_END.len()..];
            after = after.strip_prefix('\n').unwrap_or(after);
            format!("{}{}{}", &existing[..b], block, after)
        }
        _ if existing.trim().is_empty() => block,
        _ => {
            let sep = if existing.ends_with('\n') { "\n" } else { "\n\n" };
            format!("{}{}{}", existing, sep, block)
        }
    }
}

/// Profile block starting the menu on `menu_tty`.
pub fn render_menu_block(install_path: &Path, menu_tty: TerminalId) -> String {
    format!(
        "if [ -z \"$DISPLAY\" ] && [ \"${{SHLVL:-1}}\" -eq 1 ] && [ \"$(tty)\" = \"/dev/{tty}\" ]; then\n    exec {exe} --menu-tty {tty}\nfi",
        tty = menu_tty,
        exe = shell_quote(&install_path.to_string_lossy()),
    )
}

/// Profile block starting the kiosk on the user's terminals.
pub fn render_browser_block(terminals: &[TerminalId]) -> String {
    let patterns = terminals
        .iter()
        .map(|t| format!("/dev/{}", t))
        .collect::<Vec<_>>()
        .join("|");
    format!(
        "case \"$(tty)\" in\n    {patterns})\n        if [ -z \"$DISPLAY\" ]; then\n            exec \"$HOME/{launcher}\"\n        fi\n        ;;\nesac",
        patterns = patterns,
        launcher = LAUNCHER_PATH,
    )
}

/// The `kiosk-launch` script.
pub fn render_launcher(settings: &Settings) -> String {
    let browser = std::iter::once(&settings.browser.command)
        .chain(settings.browser.flags.iter())
        .map(|a| shell_quote(a))
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        r#"#!/bin/bash
# Generated by ms-util. Resolves this terminal's URL at start-up.
MAP={map}
DEFAULT_URL={default_url}
TTY_NAME="$(basename "$(tty)")"
URL=""
if [ -r "$MAP" ]; then
    URL="$(awk -v t="$TTY_NAME" '
        /^[ \t]*#/ {{ next }}
        {{ k = $0; sub(/=.*/, "", k); gsub(/[ \t]/, "", k) }}
        k == t {{ u = substr($0, index($0, "=") + 1) }}
        END {{ gsub(/^[ \t]+|[ \t\r]+$/, "", u); print u }}' "$MAP")"
fi
if [ -z "$URL" ]; then
    MSG="no URL for $TTY_NAME in $MAP, using $DEFAULT_URL"
    echo "kiosk-launch: $MSG" >&2
    logger -t kiosk-launch "$MSG" 2>/dev/null || true
    URL="$DEFAULT_URL"
fi
VT="${{TTY_NAME#tty}}"
exec xinit {browser} "$URL" -- ":$VT" "vt$VT"
"#,
        map = shell_quote(&settings.paths.url_map.to_string_lossy()),
        default_url = shell_quote(&settings.default_url),
        browser = browser,
    )
}

/// Write the managed block into the profile at `path`.
fn write_profile(path: &Path, body: &str) -> Result<ProfileWrite> {
    let existing = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };
    let content = replace_block(&existing, body);
    let changed = content != existing;
    let backup = fsutil::backup_if_changed(path, &content)?;
    fsutil::write_atomic(path, content.as_bytes(), 0o644)?;
    debug!("Wrote {} (changed: {})", path.display(), changed);
    Ok(ProfileWrite {
        path: path.to_path_buf(),
        backup,
        changed,
    })
}

fn give_to(path: &Path, account: &Account) -> Result<()> {
    chown(
        path,
        Some(Uid::from_raw(account.uid)),
        Some(Gid::from_raw(account.gid)),
    )
    .map_err(|e| KioskError::system(format!("chown {} failed: {}", path.display(), e)))
}

/// Install root's menu profile in `settings.paths.root_home`.
pub fn install_menu_profile(settings: &Settings, menu_tty: TerminalId) -> Result<ProfileWrite> {
    let path = settings.paths.root_home.join(PROFILE_FILE);
    let write = write_profile(&path, &render_menu_block(&settings.paths.install_path, menu_tty))?;
    info!("Menu profile for {} installed at {}", menu_tty, path.display());
    Ok(write)
}

/// Files written for one kiosk user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserProfileWrite {
    pub profile: ProfileWrite,
    pub launcher: ProfileWrite,
}

/// Install `account`'s login profile and launcher for `terminals`.
pub fn install_browser_profile(
    settings: &Settings,
    account: &Account,
    terminals: &[TerminalId],
) -> Result<BrowserProfileWrite> {
    if terminals.is_empty() {
        return Err(KioskError::validation(format!(
            "user {} has no terminals",
            account.name
        )));
    }
    let profile_path = account.home.join(PROFILE_FILE);
    let profile = write_profile(&profile_path, &render_browser_block(terminals))?;

    let launcher_path = account.home.join(LAUNCHER_PATH);
    let script = render_launcher(settings);
    let launcher_changed = fs::read_to_string(&launcher_path)
        .map(|c| c != script)
        .unwrap_or(true);
    let launcher_backup = fsutil::backup_if_changed(&launcher_path, &script)?;
    fsutil::write_atomic(&launcher_path, script.as_bytes(), 0o755)?;

    // The user's shell must own what it sources and executes
    let mut owned = vec![profile_path.clone(), launcher_path.clone()];
    let mut dir = launcher_path.parent();
    while let Some(d) = dir {
        if d == account.home {
            break;
        }
        owned.push(d.to_path_buf());
        dir = d.parent();
    }
    for path in &owned {
        give_to(path, account)?;
    }

    info!(
        "Kiosk profile for {} on {:?} installed",
        account.name,
        terminals.iter().map(|t| t.to_string()).collect::<Vec<_>>()
    );
    Ok(BrowserProfileWrite {
        profile,
        launcher: ProfileWrite {
            path: launcher_path,
            backup: launcher_backup,
            changed: launcher_changed,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::process::Command;
    use tempfile::TempDir;

    fn tty(n: u8) -> TerminalId {
        TerminalId::new(n).unwrap()
    }

    fn me(home: &Path) -> Account {
        Account {
            name: "kiosk".into(),
            home: home.to_path_buf(),
            uid: nix::unistd::getuid().as_raw(),
            gid: nix::unistd::getgid().as_raw(),
        }
    }

    #[test]
    fn test_replace_block_appends_and_preserves() {
        let original = "export EDITOR=vim\n";
        let once = replace_block(original, "echo one");
        assert_eq!(
            once,
            format!("export EDITOR=vim\n\n{}\necho one\n{}\n", BLOCK_BEGIN, BLOCK_END)
        );

        let twice = replace_block(&once, "echo two");
        assert!(twice.starts_with("export EDITOR=vim\n"));
        assert!(twice.contains(&format!("{}\necho two\n{}", BLOCK_BEGIN, BLOCK_END)));
        assert!(!twice.contains("echo one"));
        assert_eq!(twice.matches(BLOCK_BEGIN).count(), 1);
    }

    #[test]
    fn test_replace_block_keeps_trailing_content() {
        let content = format!("before\n{}\nold\n{}\nafter\n", BLOCK_BEGIN, BLOCK_END);
        let updated = replace_block(&content, "new");
        assert_eq!(updated, format!("before\n{}\nnew\n{}\nafter\n", BLOCK_BEGIN, BLOCK_END));
    }

    #[test]
    fn test_menu_block() {
        let block = render_menu_block(Path::new("/usr/local/bin/ms-util"), tty(12));
        assert!(block.contains("[ -z \"$DISPLAY\" ]"));
        assert!(block.contains("${SHLVL:-1}"));
        assert!(block.contains("\"/dev/tty12\""));
        assert!(block.contains("exec /usr/local/bin/ms-util --menu-tty tty12"));
    }

    #[test]
    fn test_install_menu_profile_backs_up_once() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::rooted_at(dir.path());
        fs::create_dir_all(&settings.paths.root_home).unwrap();
        fs::write(settings.paths.root_home.join(PROFILE_FILE), "# mine\n").unwrap();

        let first = install_menu_profile(&settings, tty(1)).unwrap();
        assert!(first.changed);
        assert!(first.backup.is_some());
        let second = install_menu_profile(&settings, tty(1)).unwrap();
        assert!(!second.changed);
        assert!(second.backup.is_none());

        let content = fs::read_to_string(&first.path).unwrap();
        assert!(content.starts_with("# mine\n"));
    }

    #[test]
    fn test_browser_block_lists_terminals() {
        let block = render_browser_block(&[tty(3), tty(7)]);
        assert!(block.contains("/dev/tty3|/dev/tty7)"));
        assert!(block.contains("exec \"$HOME/.local/bin/kiosk-launch\""));
    }

    #[test]
    fn test_install_browser_profile_writes_launcher() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::rooted_at(dir.path());
        let home = dir.path().join("home/kiosk");
        let account = me(&home);

        let write = install_browser_profile(&settings, &account, &[tty(3)]).unwrap();
        let mode = fs::metadata(&write.launcher.path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        assert!(fs::read_to_string(&write.profile.path).unwrap().contains("/dev/tty3)"));
        assert!(fs::read_to_string(&write.launcher.path).unwrap().contains("exec xinit /usr/bin/chromium --kiosk"));
    }

    #[test]
    fn test_no_terminals_rejected() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::rooted_at(dir.path());
        let err = install_browser_profile(&settings, &me(dir.path()), &[]).unwrap_err();
        assert!(err.is_validation());
    }

    /// Run the launcher with stub `tty` and `xinit` commands.
    fn run_launcher(settings: &Settings, dir: &TempDir, tty_name: &str) -> (String, String) {
        let bin = dir.path().join("stub-bin");
        fs::create_dir_all(&bin).unwrap();
        let stub = |name: &str, body: &str| {
            let p = bin.join(name);
            fs::write(&p, body).unwrap();
            fs::set_permissions(&p, fs::Permissions::from_mode(0o755)).unwrap();
        };
        stub("tty", &format!("#!/bin/sh\necho /dev/{}\n", tty_name));
        stub("xinit", "#!/bin/sh\necho \"xinit $*\"\n");
        stub("logger", "#!/bin/sh\nexit 0\n");

        let script = dir.path().join("kiosk-launch");
        fs::write(&script, render_launcher(settings)).unwrap();
        let path = format!("{}:{}", bin.display(), std::env::var("PATH").unwrap_or_default());
        let output = Command::new("bash").arg(&script).env("PATH", path).output().unwrap();
        (
            String::from_utf8_lossy(&output.stdout).trim().to_string(),
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        )
    }

    #[test]
    fn test_launcher_resolves_url_at_runtime() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::rooted_at(dir.path());
        fs::create_dir_all(settings.paths.url_map.parent().unwrap()).unwrap();
        fs::write(
            &settings.paths.url_map,
            "# header\ntty3=https://old.example\ntty3=https://example.com/a?b=c\ntty4=https://other.example\n",
        )
        .unwrap();

        let (stdout, stderr) = run_launcher(&settings, &dir, "tty3");
        assert!(stdout.starts_with("xinit /usr/bin/chromium --kiosk"), "{}", stdout);
        assert!(stdout.ends_with("https://example.com/a?b=c -- :3 vt3"), "{}", stdout);
        assert!(stderr.is_empty(), "{}", stderr);
    }

    #[test]
    fn test_launcher_falls_back_with_warning() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::rooted_at(dir.path());

        let (stdout, stderr) = run_launcher(&settings, &dir, "tty5");
        assert!(stdout.ends_with("http://localhost/ -- :5 vt5"), "{}", stdout);
        assert!(stderr.contains("no URL for tty5"));
    }
}
