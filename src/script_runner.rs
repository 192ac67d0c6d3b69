//! Action script execution
//!
//! This module is the only place ms-util spawns action scripts:
//!
//! - Every child is registered with the global `ChildRegistry`
//! - Every child dies with ms-util (parent-death signal)
//! - Arguments come from a `ScriptArgs` implementation, never raw strings
//!
//! Interactive runs hand the terminal to the script. Unattended runs pipe
//! its output and relay each line to the console and the log.

use crate::error::KioskError;
use crate::fsutil::is_executable;
use crate::process_guard::{ChildRegistry, CommandProcessGroup};
use crate::script_traits::ScriptArgs;
use crate::scripts::action::ActionArgs;
use anyhow::{Context, Result};
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use tracing::{debug, info, warn};

/// How the script's standard streams are wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Script inherits stdin/stdout/stderr and runs in the foreground group
    Inherit,
    /// Output is captured, relayed line by line, and logged
    Relay,
}

/// Resolve an action reference to an executable under `scripts_dir`.
///
/// A missing file or one without an execute bit is `NotFound`.
pub fn resolve_action(scripts_dir: &Path, action_ref: &str) -> crate::error::Result<PathBuf> {
    let path = scripts_dir.join(action_ref);
    if !path.is_file() {
        return Err(KioskError::not_found(format!(
            "action '{}' has no script at {}",
            action_ref,
            path.display()
        )));
    }
    if !is_executable(&path) {
        return Err(KioskError::not_found(format!(
            "action script {} is not executable",
            path.display()
        )));
    }
    Ok(path)
}

/// Run one menu action: the single entry point for collaborator scripts.
pub fn run_action(
    scripts_dir: &Path,
    args: &ActionArgs,
    mode: OutputMode,
) -> crate::error::Result<ScriptOutput> {
    let path = resolve_action(scripts_dir, args.script_name())?;
    run_script_safe(args, &path, mode).map_err(KioskError::from)
}

/// Seam between the menu runner and the scripts it launches.
pub trait ActionExecutor {
    /// Run the action, returning its output even when it exits non-zero.
    fn run(&mut self, args: &ActionArgs, mode: OutputMode) -> crate::error::Result<ScriptOutput>;
}

/// Executes actions from a scripts directory on disk.
#[derive(Debug, Clone)]
pub struct ScriptExecutor {
    scripts_dir: PathBuf,
}

impl ScriptExecutor {
    pub fn new(scripts_dir: impl Into<PathBuf>) -> Self {
        Self {
            scripts_dir: scripts_dir.into(),
        }
    }
}

impl ActionExecutor for ScriptExecutor {
    fn run(&mut self, args: &ActionArgs, mode: OutputMode) -> crate::error::Result<ScriptOutput> {
        run_action(&self.scripts_dir, args, mode)
    }
}

/// Execute a script with type-safe arguments.
///
/// `.sh` files run through `bash`; anything else is executed directly.
///
/// # Returns
///
/// - `Ok(output)` - Script ran; check `success` for its exit status
/// - `Err` - Script could not be spawned or waited on
pub fn run_script_safe<T: ScriptArgs>(
    args: &T,
    script_path: &Path,
    mode: OutputMode,
) -> Result<ScriptOutput> {
    let cli_args = args.to_cli_args();
    let env_vars = args.get_env_vars();

    info!(
        "run_script_safe: {} args={:?} env={:?}",
        script_path.display(),
        cli_args,
        env_vars
    );

    let mut cmd = if script_path.extension().is_some_and(|e| e == "sh") {
        let mut c = Command::new("bash");
        c.arg(script_path);
        c
    } else {
        Command::new(script_path)
    };
    cmd.args(&cli_args);
    for (key, value) in &env_vars {
        cmd.env(key, value);
    }

    match mode {
        OutputMode::Inherit => {
            cmd.stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .with_parent_death_signal();
        }
        OutputMode::Relay => {
            cmd.stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .in_new_process_group();
        }
    }

    let child = cmd
        .spawn()
        .with_context(|| format!("Failed to spawn script: {}", script_path.display()))?;
    let pid = child.id();
    register(pid);

    let result = wait_for(child, args.script_name(), mode);
    unregister(pid);
    let (stdout, stderr, status) = result?;

    let exit_code = status.code();
    let success = status.success();
    if success {
        info!("Script {} executed successfully", args.script_name());
    } else {
        warn!(
            "Script {} failed with exit code {}",
            args.script_name(),
            exit_code.unwrap_or(-1)
        );
    }
    Ok(ScriptOutput {
        stdout,
        stderr,
        exit_code,
        success,
    })
}

fn register(pid: u32) {
    // A poisoned registry only loses cleanup bookkeeping
    if let Ok(mut guard) = ChildRegistry::global().lock() {
        guard.register(pid);
    }
}

fn unregister(pid: u32) {
    if let Ok(mut guard) = ChildRegistry::global().lock() {
        guard.unregister(pid);
    }
}

fn wait_for(
    mut child: Child,
    name: &str,
    mode: OutputMode,
) -> Result<(String, String, std::process::ExitStatus)> {
    if mode == OutputMode::Inherit {
        let status = child
            .wait()
            .with_context(|| format!("Failed waiting for script: {}", name))?;
        return Ok((String::new(), String::new(), status));
    }

    // stderr drains on its own thread so neither pipe can fill up and stall
    let stderr_handle = child.stderr.take().map(|stderr| {
        let name = name.to_string();
        std::thread::spawn(move || {
            relay_lines(stderr, |line| {
                eprintln!("{}", line);
                warn!(target: "action", "[{}] {}", name, line);
            })
        })
    });

    let stdout_text = match child.stdout.take() {
        Some(stdout) => relay_lines(stdout, |line| {
            println!("{}", line);
            debug!(target: "action", "[{}] {}", name, line);
        }),
        None => String::new(),
    };

    let status = child
        .wait()
        .with_context(|| format!("Failed waiting for script: {}", name))?;
    let stderr_text = stderr_handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default();
    Ok((stdout_text, stderr_text, status))
}

/// Read `pipe` to EOF, handing each line to `each` and collecting them all.
///
/// Lines are decoded lossily so a stray Latin-1 byte never stops the read
/// and leaves the script writing into a closed pipe.
fn relay_lines<R: Read>(pipe: R, mut each: impl FnMut(&str)) -> String {
    let mut reader = BufReader::new(pipe);
    let mut collected = String::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let raw = String::from_utf8_lossy(&buf);
                let line = raw.trim_end_matches(['\n', '\r']);
                each(line);
                collected.push_str(line);
                collected.push('\n');
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("Stopped reading script output: {}", e);
                break;
            }
        }
    }
    collected
}

/// Output from a script execution.
#[derive(Debug, Clone)]
pub struct ScriptOutput {
    /// Standard output (empty when the terminal was inherited).
    pub stdout: String,
    /// Standard error (empty when the terminal was inherited).
    pub stderr: String,
    /// Exit code (None if terminated by signal).
    pub exit_code: Option<i32>,
    /// Whether the script exited successfully (exit code 0).
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    struct Plain {
        name: String,
        args: Vec<String>,
        env: Vec<(String, String)>,
    }

    impl ScriptArgs for Plain {
        fn to_cli_args(&self) -> Vec<String> {
            self.args.clone()
        }
        fn get_env_vars(&self) -> Vec<(String, String)> {
            self.env.clone()
        }
        fn script_name(&self) -> &str {
            &self.name
        }
    }

    fn script(dir: &TempDir, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, body).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_relay_captures_output_and_env() {
        let dir = TempDir::new().unwrap();
        let path = script(
            &dir,
            "echo.sh",
            "echo \"args: $*\"\necho \"env: $MEDIASCREEN_TEST\"\necho oops >&2\n",
        );
        let args = Plain {
            name: "echo.sh".into(),
            args: vec!["--auto".into(), "--debug".into()],
            env: vec![("MEDIASCREEN_TEST".into(), "yes".into())],
        };
        let output = run_script_safe(&args, &path, OutputMode::Relay).unwrap();
        assert!(output.success);
        assert!(output.stdout.contains("args: --auto --debug"));
        assert!(output.stdout.contains("env: yes"));
        assert_eq!(output.stderr.trim(), "oops");
    }

    #[test]
    fn test_failure_exit_code() {
        let dir = TempDir::new().unwrap();
        let path = script(&dir, "fail.sh", "echo broken >&2\nexit 4\n");
        let args = Plain {
            name: "fail.sh".into(),
            args: vec![],
            env: vec![],
        };
        let output = run_script_safe(&args, &path, OutputMode::Relay).unwrap();
        assert!(!output.success);
        assert_eq!(output.exit_code, Some(4));
        assert_eq!(output.stderr.trim(), "broken");
    }

    #[test]
    fn test_relay_survives_invalid_utf8() {
        let dir = TempDir::new().unwrap();
        // Latin-1 output, then enough volume to fill a pipe nobody reads
        let path = script(
            &dir,
            "latin1.sh",
            "printf 'caf\\xe9\\n'\nprintf 'x\\xff\\n' >&2\nhead -c 300000 /dev/zero | tr '\\0' 'a'\necho\necho done\nexit 0\n",
        );
        let args = Plain {
            name: "latin1.sh".into(),
            args: vec![],
            env: vec![],
        };
        let output = run_script_safe(&args, &path, OutputMode::Relay).unwrap();
        assert!(output.success, "exit code {:?}", output.exit_code);
        assert_eq!(output.exit_code, Some(0));
        assert!(output.stdout.starts_with("caf\u{FFFD}\n"));
        assert!(output.stdout.trim_end().ends_with("done"));
        assert!(output.stdout.len() > 300_000);
        assert_eq!(output.stderr, "x\u{FFFD}\n");
    }

    #[test]
    fn test_relay_lines_keeps_unterminated_tail() {
        let collected = relay_lines(&b"one\r\ntwo"[..], |_| {});
        assert_eq!(collected, "one\ntwo\n");
    }

    #[test]
    fn test_non_shell_executable_runs_directly() {
        let dir = TempDir::new().unwrap();
        let path = script(&dir, "tool", "#!/bin/sh\nexit 0\n");
        let args = Plain {
            name: "tool".into(),
            args: vec![],
            env: vec![],
        };
        assert!(run_script_safe(&args, &path, OutputMode::Relay).unwrap().success);
    }

    #[test]
    fn test_run_action_resolves_under_scripts_dir() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("tools")).unwrap();
        script(&dir, "tools/ok.sh", "echo \"menu=$MEDIASCREEN_MENU_TTY\"\n");
        let mut args = ActionArgs::new("tools/ok.sh");
        args.menu_tty = crate::terminal::TerminalId::new(4).ok();
        let mut exec = ScriptExecutor::new(dir.path());
        let output = exec.run(&args, OutputMode::Relay).unwrap();
        assert!(output.stdout.contains("menu=tty4"));
    }

    #[test]
    fn test_missing_action_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = run_action(dir.path(), &ActionArgs::new("nope.sh"), OutputMode::Relay).unwrap_err();
        assert!(matches!(err, KioskError::NotFound(_)));
    }

    #[test]
    fn test_non_executable_action_is_not_found() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("plain.sh"), "exit 0\n").unwrap();
        fs::set_permissions(dir.path().join("plain.sh"), fs::Permissions::from_mode(0o644)).unwrap();
        let err = resolve_action(dir.path(), "plain.sh").unwrap_err();
        assert!(err.to_string().contains("not executable"));
    }

    #[test]
    fn test_missing_script_spawn_error() {
        let args = Plain {
            name: "absent".into(),
            args: vec![],
            env: vec![],
        };
        let result = run_script_safe(&args, Path::new("/nonexistent/absent"), OutputMode::Relay);
        assert!(result.is_err());
    }
}
