//! Event CLI commands

use super::{open_client, CommandError};
use crate::config::ConfigOverrides;

/// Print wallet transactions until interrupted or the transport fails
pub async fn watch(
    overrides: &ConfigOverrides,
    mnemonic: Option<&str>,
    colored_only: bool,
    unsecure: bool,
) -> Result<(), CommandError> {
    let (_, client) = open_client(overrides, mnemonic)?;
    if unsecure {
        client.set_events_secure(false).await?;
    }

    let print = |event: &crate::events::TransactionEvent| {
        println!(
            "{} {}{} touching {}",
            event.received_at.format("%H:%M:%S"),
            event.txid,
            if event.colored { " [colored]" } else { "" },
            event.addresses.join(", ")
        );
    };
    if colored_only {
        client.on_new_cc_transaction(print).await?;
    } else {
        client.on_new_transaction(print).await?;
    }

    let (failed_tx, mut failed_rx) = tokio::sync::mpsc::unbounded_channel();
    client.on_notifier_error(move |e| {
        let _ = failed_tx.send(e.clone());
    })?;

    println!(
        "Watching for {} transactions ({} mode), Ctrl-C to stop",
        if colored_only { "colored" } else { "all" },
        if client.events_secure() { "secure" } else { "unsecure" }
    );

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            client.shutdown().await;
            Ok(())
        }
        Some(e) = failed_rx.recv() => Err(crate::manager::ClientError::from(e).into()),
    }
}
