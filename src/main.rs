//! ms-util - Main entry point
//!
//! Parses the command line once, loads settings, then dispatches to the
//! menu, a full install, or one of the maintenance subcommands.

use mediascreen::accounts::SystemAccounts;
use mediascreen::cli::{Cli, Commands};
use mediascreen::context::{Context, RunOptions};
use mediascreen::error::{KioskError, Result};
use mediascreen::getty::{self, ReconcileOptions, Systemctl};
use mediascreen::menu::{MenuRunner, MenuServices, SystemHost};
use mediascreen::process_guard::{self, ProcessGuard};
use mediascreen::prompt::Prompter;
use mediascreen::script_runner::ScriptExecutor;
use mediascreen::settings::Settings;
use mediascreen::update::HttpFetcher;
use mediascreen::wait::CancelToken;
use mediascreen::{logging, menu_config, sanity, session, url_map};
use std::io::IsTerminal;
use std::process::ExitCode;
use tracing::{debug, error, info, warn};

/// Main application entry point
fn main() -> ExitCode {
    let cli = Cli::parse_args();

    let settings = match Settings::load(&cli.settings) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("✗ Failed to load settings {}: {}", cli.settings.display(), e);
            return ExitCode::FAILURE;
        }
    };

    logging::init_logging(&settings.paths.log_file, cli.debug);
    info!("ms-util {} starting up", env!("CARGO_PKG_VERSION"));

    // Scripts must not outlive ms-util on SIGTERM/SIGHUP or a second Ctrl+C
    let cancel = CancelToken::new();
    if let Err(e) = process_guard::init_signal_handlers(&cancel) {
        warn!("Failed to initialize signal handlers: {}", e);
    }
    let _guard = ProcessGuard::new();
    debug!("Signal handlers initialized");

    let ctx = Context::new(settings, RunOptions::from_cli(&cli));
    match dispatch(&cli, &ctx, &cancel) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("✗ {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

fn dispatch(cli: &Cli, ctx: &Context, cancel: &CancelToken) -> Result<()> {
    match &cli.command {
        None if ctx.options.auto || ctx.options.assignments.is_some() => run_full_install(cli, ctx, cancel),
        None | Some(Commands::Menu) => run_menu(cli, ctx, cancel),
        Some(Commands::Autologin { .. }) => run_autologin(ctx),
        Some(Commands::KioskUrl { tty }) => run_kiosk_url(ctx, tty.as_deref()),
        Some(Commands::Validate { config }) => {
            let path = config.clone().unwrap_or_else(|| ctx.settings.paths.menu_config.clone());
            run_validate(&path)
        }
        Some(Commands::Status) => run_status(ctx),
        Some(Commands::Update) => run_update(cli, ctx, cancel),
    }
}

/// Build a runner wired to the real system and hand it to `f`.
fn with_runner<T>(
    cli: &Cli,
    ctx: &Context,
    cancel: &CancelToken,
    entries: Vec<menu_config::MenuEntry>,
    f: impl FnOnce(&mut MenuRunner<'_, std::io::BufReader<std::io::Stdin>, std::io::Stdout>) -> Result<T>,
) -> Result<T> {
    let mut actions = ScriptExecutor::new(&ctx.settings.paths.scripts_dir);
    let mut units = Systemctl;
    let mut accounts = SystemAccounts;
    let fetcher = HttpFetcher::new()?;
    let mut host = SystemHost::new(cli.relaunch_args());
    let services = MenuServices {
        actions: &mut actions,
        units: &mut units,
        accounts: &mut accounts,
        fetcher: &fetcher,
        host: &mut host,
    };
    let mut runner = MenuRunner::new(ctx, entries, services, Prompter::stdio(), cancel.clone())?
        .styled(std::io::stdout().is_terminal());
    f(&mut runner)
}

fn run_menu(cli: &Cli, ctx: &Context, cancel: &CancelToken) -> Result<()> {
    let entries = menu_config::load(&ctx.settings.paths.menu_config)?;
    info!("Launching menu with {} entries", entries.len());
    with_runner(cli, ctx, cancel, entries, |runner| runner.run())
}

fn run_full_install(cli: &Cli, ctx: &Context, cancel: &CancelToken) -> Result<()> {
    let entries = menu_config::load(&ctx.settings.paths.menu_config)?;
    info!("Running full install ({} entries, auto={})", entries.len(), ctx.options.auto);
    let report = with_runner(cli, ctx, cancel, entries, |runner| runner.full_install())?;
    println!(
        "✓ Full install complete: {} ran, {} failed, {} skipped",
        report.executed.len(),
        report.failed.len(),
        report.skipped.len()
    );
    Ok(())
}

fn run_autologin(ctx: &Context) -> Result<()> {
    sanity::run_preflight_checks()?;
    let table = ctx.session_table()?.ok_or_else(|| {
        KioskError::validation("no browser assignments given (use --assign or --user with --url)")
    })?;
    let options = ReconcileOptions {
        restart: true,
        current_tty: getty::current_terminal(),
    };
    let report = session::apply_session_plan(
        &ctx.settings,
        &table,
        &mut Systemctl,
        &mut SystemAccounts,
        options,
    )?;
    for warning in &report.reconcile.warnings {
        println!("⚠ {}", warning);
    }
    print!("{}", table);
    println!(
        "✓ Session setup complete: {} terminal(s) enabled, {} masked",
        report.reconcile.enabled().len(),
        report.reconcile.masked().len()
    );
    Ok(())
}

fn run_kiosk_url(ctx: &Context, tty: Option<&str>) -> Result<()> {
    let tty = match tty {
        Some(t) => t.parse()?,
        None => getty::current_terminal()
            .ok_or_else(|| KioskError::validation("not on a virtual terminal; pass --tty"))?,
    };
    let url = url_map::resolve_url(&ctx.settings.paths.url_map, tty, &ctx.settings.default_url)?;
    println!("{}", url);
    Ok(())
}

fn run_validate(path: &std::path::Path) -> Result<()> {
    info!("Validating menu configuration: {}", path.display());
    let entries = menu_config::load(path)?;
    println!("✓ {} is valid ({} entries)", path.display(), entries.len());
    for entry in menu_config::execution_plan(&entries) {
        println!("  {:>3}  {}  ({})", entry.exec_order.to_string(), entry.name, entry.action_ref);
    }
    let manual = entries.iter().filter(|e| e.exec_order.is_manual_only()).count();
    if manual > 0 {
        println!("  {} manual-only entr{}", manual, if manual == 1 { "y" } else { "ies" });
    }
    Ok(())
}

fn run_status(ctx: &Context) -> Result<()> {
    let rows = getty::status(&mut Systemctl, &ctx.settings.paths.systemd_dir)?;
    let urls = url_map::UrlMap::load(&ctx.settings.paths.url_map)?;
    println!("{:<6} {:<18} {:<12} URL", "TTY", "STATE", "AUTOLOGIN");
    for row in rows {
        println!(
            "{:<6} {:<18} {:<12} {}",
            row.tty.to_string(),
            row.state.to_string(),
            row.autologin_user.as_deref().unwrap_or("-"),
            urls.get(row.tty).unwrap_or("-")
        );
    }
    Ok(())
}

fn run_update(cli: &Cli, ctx: &Context, cancel: &CancelToken) -> Result<()> {
    with_runner(cli, ctx, cancel, Vec::new(), |runner| runner.update())
}
