//! Self-replacing update
//!
//! `ms-util update` downloads a fresh build of itself, swaps it in place of
//! the installed binary, and re-executes with the same arguments:
//!
//! 1. Fetch `<source>/<channel>/ms-util-<arch>` (bounded retries)
//! 2. Stage it next to the install path as `<install_path>.new`
//! 3. Rename the staged file over the installed one
//! 4. `exec` the new binary
//!
//! A missing release (HTTP 404) is reported as `NotFound` without retrying
//! so the operator can be asked for another source.

use crate::assignment::validate_url;
use crate::error::{KioskError, Result};
use crate::wait::{self, CancelToken, WaitOutcome};
use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Name prefix of published binaries.
pub const ARTIFACT_PREFIX: &str = "ms-util-";

/// Seam over the download transport.
pub trait Fetch {
    /// Download `url`. 404 is `NotFound`; anything retryable is
    /// `TransientNetwork`.
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Blocking HTTP(S) client.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("ms-util/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| KioskError::system(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl Fetch for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| KioskError::transient(format!("{}: {}", url, e)))?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(KioskError::not_found(url.to_string()));
        }
        if !status.is_success() {
            return Err(KioskError::transient(format!("{}: HTTP {}", url, status)));
        }
        let bytes = response
            .bytes()
            .map_err(|e| KioskError::transient(format!("{}: {}", url, e)))?;
        Ok(bytes.to_vec())
    }
}

/// Download location of the build for this machine.
pub fn release_url(source: &str, channel: &str) -> String {
    format!(
        "{}/{}/{}{}",
        source.trim_end_matches('/'),
        channel,
        ARTIFACT_PREFIX,
        std::env::consts::ARCH
    )
}

/// Fetch `url`, retrying transient failures up to `attempts` times with
/// `backoff` between tries. Interrupting a backoff yields `Interrupted`.
pub fn fetch_with_retry(
    fetcher: &dyn Fetch,
    url: &str,
    attempts: u32,
    backoff: Duration,
    cancel: &CancelToken,
) -> Result<Vec<u8>> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        info!("Downloading {} (attempt {}/{})", url, attempt, attempts);
        match fetcher.fetch(url) {
            Ok(bytes) => return Ok(bytes),
            Err(KioskError::TransientNetwork(msg)) if attempt < attempts => {
                warn!("Download failed: {}; retrying in {}s", msg, backoff.as_secs());
                let outcome: WaitOutcome<()> = wait::poll(backoff, backoff, cancel, || None, |_| {});
                if outcome == WaitOutcome::Cancelled {
                    return Err(KioskError::Interrupted);
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Staging path for an update of `install_path`.
pub fn staging_path(install_path: &Path) -> PathBuf {
    let mut name = install_path.as_os_str().to_os_string();
    name.push(".new");
    PathBuf::from(name)
}

/// Write `bytes` to the staging path, executable and synced.
pub fn stage(install_path: &Path, bytes: &[u8]) -> Result<PathBuf> {
    if bytes.is_empty() {
        return Err(KioskError::validation("downloaded update is empty"));
    }
    let staged = staging_path(install_path);
    if let Some(parent) = staged.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::File::create(&staged)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::set_permissions(&staged, fs::Permissions::from_mode(0o755))?;
    Ok(staged)
}

/// Move the staged binary over `install_path` in one rename.
pub fn swap_in(staged: &Path, install_path: &Path) -> Result<()> {
    fs::rename(staged, install_path)?;
    info!("Installed update at {}", install_path.display());
    Ok(())
}

/// Download, stage and install the build from `source`. Returns the
/// installed path; the caller decides when to relaunch.
pub fn download_and_install(
    fetcher: &dyn Fetch,
    source: &str,
    channel: &str,
    install_path: &Path,
    attempts: u32,
    backoff: Duration,
    cancel: &CancelToken,
) -> Result<PathBuf> {
    validate_url(source)?;
    let url = release_url(source, channel);
    let bytes = fetch_with_retry(fetcher, &url, attempts, backoff, cancel)?;
    let staged = stage(install_path, &bytes)?;
    if let Err(e) = swap_in(&staged, install_path) {
        let _ = fs::remove_file(&staged);
        return Err(e);
    }
    Ok(install_path.to_path_buf())
}

/// Replace the running process with `program`. Only returns on failure.
pub fn relaunch(program: &Path, args: &[OsString]) -> KioskError {
    use std::os::unix::process::CommandExt;
    info!("Relaunching {} {:?}", program.display(), args);
    let err = std::process::Command::new(program).args(args).exec();
    KioskError::system(format!("exec {} failed: {}", program.display(), err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tempfile::TempDir;

    /// Replays a fixed sequence of fetch results.
    struct Scripted {
        results: RefCell<Vec<Result<Vec<u8>>>>,
        urls: RefCell<Vec<String>>,
    }

    impl Scripted {
        fn new(mut results: Vec<Result<Vec<u8>>>) -> Self {
            results.reverse();
            Self {
                results: RefCell::new(results),
                urls: RefCell::new(Vec::new()),
            }
        }
        fn calls(&self) -> usize {
            self.urls.borrow().len()
        }
    }

    impl Fetch for Scripted {
        fn fetch(&self, url: &str) -> Result<Vec<u8>> {
            self.urls.borrow_mut().push(url.to_string());
            self.results
                .borrow_mut()
                .pop()
                .unwrap_or_else(|| Err(KioskError::transient("exhausted")))
        }
    }

    #[test]
    fn test_release_url() {
        let url = release_url("https://releases.example/ms/", "stable");
        assert_eq!(
            url,
            format!("https://releases.example/ms/stable/ms-util-{}", std::env::consts::ARCH)
        );
    }

    #[test]
    fn test_retries_transient_then_succeeds() {
        let fetcher = Scripted::new(vec![
            Err(KioskError::transient("reset")),
            Ok(b"binary".to_vec()),
        ]);
        let bytes = fetch_with_retry(&fetcher, "http://x/y", 3, Duration::ZERO, &CancelToken::new()).unwrap();
        assert_eq!(bytes, b"binary");
        assert_eq!(fetcher.calls(), 2);
    }

    #[test]
    fn test_gives_up_after_attempts() {
        let fetcher = Scripted::new(vec![]);
        let err = fetch_with_retry(&fetcher, "http://x/y", 3, Duration::ZERO, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, KioskError::TransientNetwork(_)));
        assert_eq!(fetcher.calls(), 3);
    }

    #[test]
    fn test_not_found_is_not_retried() {
        let fetcher = Scripted::new(vec![Err(KioskError::not_found("http://x/y"))]);
        let err = fetch_with_retry(&fetcher, "http://x/y", 3, Duration::ZERO, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, KioskError::NotFound(_)));
        assert_eq!(fetcher.calls(), 1);
    }

    #[test]
    fn test_cancelled_backoff_is_interrupted() {
        let fetcher = Scripted::new(vec![Err(KioskError::transient("reset"))]);
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = fetch_with_retry(&fetcher, "http://x/y", 3, Duration::from_secs(2), &cancel).unwrap_err();
        assert!(matches!(err, KioskError::Interrupted));
    }

    #[test]
    fn test_download_and_install_swaps_binary() {
        let dir = TempDir::new().unwrap();
        let install = dir.path().join("bin/ms-util");
        fs::create_dir_all(install.parent().unwrap()).unwrap();
        fs::write(&install, b"old").unwrap();

        let fetcher = Scripted::new(vec![Ok(b"new".to_vec())]);
        download_and_install(
            &fetcher,
            "https://releases.example",
            "beta",
            &install,
            3,
            Duration::ZERO,
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(fs::read(&install).unwrap(), b"new");
        assert!(!staging_path(&install).exists());
        let mode = fs::metadata(&install).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        assert!(fetcher.urls.borrow()[0].contains("/beta/ms-util-"));
    }

    #[test]
    fn test_invalid_source_rejected_before_fetch() {
        let dir = TempDir::new().unwrap();
        let fetcher = Scripted::new(vec![]);
        let err = download_and_install(
            &fetcher,
            "ftp://releases.example",
            "stable",
            &dir.path().join("ms-util"),
            3,
            Duration::ZERO,
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(fetcher.calls(), 0);
    }

    #[test]
    fn test_empty_download_rejected() {
        let dir = TempDir::new().unwrap();
        assert!(stage(&dir.path().join("ms-util"), b"").unwrap_err().is_validation());
    }
}
