//! Deckwarden CLI - Bitwarden vault access through the Flatpak sandbox.

use clap::Parser;
use deckwarden::backend::{Backend, Request};
use deckwarden::cli::{Action, Cli, render_human};
use deckwarden::config::{ConfigOverrides, ResolvedConfig, resolve_config};
use deckwarden::logging::{self, LOG_ENV, LogOptions};
use deckwarden::process::SystemRunner;
use deckwarden::rpc::Server;
use std::env;
use std::io;
use std::path::Path;
use std::process;
use std::sync::Arc;

fn main() {
    let cli = Cli::parse();
    let human = cli.human_readable;

    match run(cli) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            if human {
                eprintln!("Error: {}", e);
            } else {
                eprintln!("{}", serde_json::json!({ "error": e.to_string() }));
            }
            process::exit(1);
        }
    }
}

/// Returns whether the command succeeded.
fn run(cli: Cli) -> Result<bool, deckwarden::Error> {
    let overrides = ConfigOverrides {
        config_path: cli.config.clone(),
        flatpak: cli.flatpak.clone(),
        app_id: cli.app_id.clone(),
        timeout_ms: cli.timeout_ms,
    };
    let config = resolve_config(&overrides)?;

    // Flushes the file log on drop.
    let _guard = logging::init(&LogOptions {
        verbose: cli.verbose,
        quiet: cli.quiet,
        directive: env::var(LOG_ENV).ok(),
        log_dir: config.log_dir().map(Path::to_path_buf),
    })?;
    tracing::debug!(version = deckwarden::VERSION, "starting");

    let action = cli.command.into_action(&mut io::stdin().lock())?;
    match action {
        Action::ConfigShow => {
            show_config(&config, cli.human_readable)?;
            Ok(true)
        }
        Action::Serve => {
            serve(&config, cli.session)?;
            Ok(true)
        }
        Action::Request(request) => execute(&config, cli.session, request, cli.human_readable),
    }
}

fn execute(
    config: &ResolvedConfig,
    session_key: Option<String>,
    request: Request,
    human: bool,
) -> Result<bool, deckwarden::Error> {
    let operation = request.operation();
    let runner = Arc::new(SystemRunner);
    let backend_config = config.backend_config(session_key);
    // Host probes and clipboard copies do not need to know the phase.
    let backend = if operation.is_session_op() {
        Backend::init(backend_config, runner)?
    } else {
        Backend::start(backend_config, runner)?
    };

    let envelope = backend.execute(request);
    backend.teardown();

    if human {
        println!("{}", render_human(operation, &envelope));
    } else {
        println!("{}", serde_json::to_string(&envelope)?);
    }
    Ok(envelope.is_ok())
}

fn serve(config: &ResolvedConfig, session_key: Option<String>) -> Result<(), deckwarden::Error> {
    let backend = Backend::init(config.backend_config(session_key), Arc::new(SystemRunner))?;
    let server = Server::new(backend);

    let handle = server.shutdown_handle();
    ctrlc::set_handler(move || handle.shutdown())
        .map_err(|e| deckwarden::Error::Other(format!("failed to install signal handler: {}", e)))?;

    tracing::info!("serving on stdio");
    server.run(io::BufReader::new(io::stdin()), io::stdout())
}

fn show_config(config: &ResolvedConfig, human: bool) -> Result<(), deckwarden::Error> {
    if !human {
        println!("{}", serde_json::to_string_pretty(config)?);
        return Ok(());
    }

    match &config.path {
        Some(path) => println!(
            "config file: {} ({}{})",
            path.value.display(),
            path.source,
            if config.file_found { "" } else { ", not found" }
        ),
        None => println!("config file: none"),
    }
    println!("flatpak: {} ({})", config.flatpak.value, config.flatpak.source);
    println!("app-id: {} ({})", config.app_id.value, config.app_id.source);
    println!(
        "timeout-ms: {} ({})",
        config.timeout_ms.value, config.timeout_ms.source
    );
    println!(
        "clipboard-timeout-ms: {} ({})",
        config.clipboard_timeout_ms.value, config.clipboard_timeout_ms.source
    );
    let mechanisms: Vec<&str> = config.clipboard.value.iter().map(|m| m.name()).collect();
    println!(
        "clipboard: {} ({})",
        mechanisms.join(", "),
        config.clipboard.source
    );
    println!(
        "password-env: {} ({})",
        config.password_env.value, config.password_env.source
    );
    println!(
        "attach-diagnostics: {} ({})",
        config.attach_diagnostics.value, config.attach_diagnostics.source
    );
    println!(
        "lock-on-teardown: {} ({})",
        config.lock_on_teardown.value, config.lock_on_teardown.source
    );
    if let Some(dir) = &config.log_dir {
        println!("log-dir: {} ({})", dir.value.display(), dir.source);
    }
    Ok(())
}
