//! `vmgate console`: relay one console ticket by hand.
//!
//! Registers a single relay session for a ticket obtained elsewhere, prints
//! the client URL and serves until that session ends, its pending window
//! lapses, or Ctrl-C.

use std::time::Duration;

use tokio::signal;
use tracing::info;

use super::{output, ConsoleArgs};
use crate::domain::ConsoleTicket;
use crate::error::Result;
use crate::infrastructure::config::Config;
use crate::infrastructure::relay::{RelayManager, RelayStats};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Run the one-off relay.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or the listener cannot
/// be bound.
pub async fn execute(args: ConsoleArgs) -> Result<()> {
    let mut config = if args.config.exists() {
        Config::load(&args.config)?
    } else {
        Config::default()
    };
    if let Some(listen) = args.listen {
        config.relay.listen = listen;
    }
    if args.plain {
        config.relay.upstream_tls = false;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.init_logging();

    let relay = RelayManager::new(config.relay)?;
    let listener = relay.bind().await?;
    let addr = listener.local_addr()?;

    let ticket = ConsoleTicket::new(args.ticket, args.host, args.port);
    let session = relay.create_session(ticket);
    output::ok("Console session registered");
    output::key_value("attach url", format!("ws://{addr}{}", relay.attach_path(&session)));
    output::key_value(
        "expires in",
        format!("{}s unless attached", relay.config().pending_ttl_secs),
    );

    tokio::select! {
        () = relay.serve(listener) => {}
        stats = finished(&relay) => {
            info!(
                completed = stats.completed,
                expired = stats.expired,
                failed = stats.failed,
                bytes_to_upstream = stats.bytes_to_upstream,
                bytes_to_client = stats.bytes_to_client,
                "Console session finished"
            );
        }
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received");
            relay.shutdown();
        }
    }
    Ok(())
}

/// Resolves once the only session has ended, failed to attach, or expired.
async fn finished(relay: &RelayManager) -> RelayStats {
    loop {
        let stats = relay.stats();
        if stats.completed + stats.failed + stats.expired > 0 {
            return stats;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}
