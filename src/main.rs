//! axe-audit binary: parse flags, resolve configuration, run the pipeline,
//! map the outcome to the contractual exit codes.

mod cli;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use axe_audit::error::AuditError;
use axe_audit::pipeline::AuditPipeline;

const EXIT_NO_REPORTS: i32 = 1;
const EXIT_FATAL: i32 = 2;
const EXIT_INTERRUPTED: i32 = 130;

#[tokio::main]
async fn main() {
    let args = cli::Cli::parse();
    let overrides = args.into_overrides();

    let config = match axe_audit::config::resolve(&overrides) {
        Ok(config) => config,
        Err(e) => {
            // Logging may not be initialized yet; stderr directly.
            eprintln!("axe-audit: {e}");
            std::process::exit(EXIT_FATAL);
        }
    };

    init_tracing(&config.log_level);

    // SIGINT/SIGTERM propagate to stages as a cancellation signal; stages
    // drain and persist state before exiting. A bounded drain window keeps
    // a wedged browser from holding the process hostage.
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        let interrupted = wait_for_shutdown_signal().await;
        if interrupted {
            info!("shutdown signal received, draining stages (30s window)");
            let _ = cancel_tx.send(true);
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            error!("drain window expired, forcing exit");
            std::process::exit(EXIT_INTERRUPTED);
        }
    });

    let pipeline = AuditPipeline::new(config);
    let code = match pipeline.run(cancel_rx).await {
        Ok(summary) => {
            let code = summary.exit_code();
            match code {
                0 => info!("done: {} report(s) produced", summary.report_paths.len()),
                EXIT_INTERRUPTED => info!("interrupted; partial state persisted"),
                _ => error!("no reports produced"),
            }
            code
        }
        Err(AuditError::Fatal(msg)) => {
            error!("fatal: {msg}");
            EXIT_FATAL
        }
        Err(other) => {
            error!("{other}");
            EXIT_NO_REPORTS
        }
    };
    std::process::exit(code);
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_env("AXE_LOG_LEVEL")
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Wait for SIGINT or SIGTERM. Returns true when one arrived.
async fn wait_for_shutdown_signal() -> bool {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(_) => return tokio::signal::ctrl_c().await.is_ok(),
        };
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.is_ok(),
            _ = sigterm.recv() => true,
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.is_ok()
    }
}
