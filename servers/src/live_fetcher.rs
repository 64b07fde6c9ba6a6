//! # Live Fetcher
//!
//! Records one Douyin live room to disk. The room id is resolved from the public live
//! id, the push connection is signed through an external command, and every
//! recognized event is appended to a per-broadcast text file under the record
//! directory. Lost connections are retried until the broadcast ends or the process
//! receives Ctrl-C / SIGTERM. After each lost session the room's live status is
//! logged.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::signal;
use tracing::{error, info};

use lib_livefeed::alerts::{CommandAlert, LogOnlyAlert};
use lib_livefeed::core::AlertChannel;
use lib_livefeed::ingestors::DouyinWssIngestor;
use lib_livefeed::loggers::FileLogSink;
use lib_livefeed::retrieve::{CommandSigner, HttpRoomResolver, SignerInput};

mod fetcher_logic;
use fetcher_logic::{config, logger};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load_config()?;
    let _guard = logger::setup_logging(&config.log_dir(), &config.log_level())?;

    let ingestor_config = config.ingestor_config()?;

    let signer = config
        .sign_command
        .as_deref()
        .and_then(CommandSigner::from_command_line)
        .ok_or_else(|| anyhow!("a signing command is required (--sign-command or LIVEFEED_SIGN_COMMAND)"))?;
    let mut resolver = HttpRoomResolver::new(&ingestor_config.user_agent)?;
    if let Some(status_signer) = config
        .status_sign_command
        .as_deref()
        .and_then(CommandSigner::from_command_line)
    {
        resolver = resolver.with_status_signer(Arc::new(status_signer.with_input(SignerInput::QueryString)));
    }
    let sink = FileLogSink::new(config.record_dir());
    let alert: Arc<dyn AlertChannel> = match config
        .alert_command
        .as_deref()
        .and_then(CommandAlert::from_command_line)
    {
        Some(command) => Arc::new(command),
        None => Arc::new(LogOnlyAlert),
    };

    info!(
        live_id = %ingestor_config.live_id,
        record_dir = %config.record_dir().display(),
        "starting live fetcher"
    );

    let ingestor = DouyinWssIngestor::new(
        ingestor_config,
        Arc::new(resolver),
        Arc::new(signer),
        Arc::new(sink),
        alert,
    );

    let run = ingestor.run();
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => {
            if let Err(e) = result {
                error!(error = %e, "ingestor could not run");
                return Err(e.into());
            }
            info!("broadcast finished");
            return Ok(());
        }
        _ = shutdown_signal() => {}
    }

    ingestor.stop();
    if let Err(e) = run.await {
        error!(error = %e, "ingestor did not shut down cleanly");
    }

    info!("Shutdown complete.");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term_signal) => {
                term_signal.recv().await;
                info!("SIGTERM received, initiating shutdown.");
            }
            Err(e) => {
                error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = signal::ctrl_c() => info!("Ctrl-C received, initiating shutdown."),
        _ = terminate => {}
    }
}
