use super::{describe_pointer, projection_table, record_table};
use anyhow::{anyhow, Result};
use drawlive_core::{ClientConfig, ConnectionManager, ConnectionNotice, Station};
use drawlive_reveal::{LiveDraw, RevealConfig, RevealUpdate};
use tokio::sync::broadcast::error::RecvError;

pub async fn handle_watch(
    station: Station,
    token: String,
    client: ClientConfig,
    reveal: RevealConfig,
) -> Result<()> {
    println!("Watching '{}' via {}", station, client.server_url);

    let manager = ConnectionManager::new(client)?;
    let mut notices = manager.subscribe_notices();
    let draw = LiveDraw::watch(&manager, token, station, reveal);
    let mut updates = draw.subscribe();

    let outcome = loop {
        tokio::select! {
            notice = notices.recv() => match notice {
                Ok(ConnectionNotice::Connected { mode }) => {
                    println!("Connected ({} transport)", mode);
                }
                Ok(ConnectionNotice::Disconnected { reason }) => {
                    println!("Disconnected: {}. Reconnecting...", reason);
                }
                Ok(ConnectionNotice::ConnectionError { kind, message }) if kind.is_terminal() => {
                    break Err(anyhow!("connection failed ({:?}): {}", kind, message));
                }
                Ok(ConnectionNotice::ConnectionError { message, .. }) => {
                    println!("Server warning: {}", message);
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::debug!("Skipped {} connection notices", missed);
                }
                Err(RecvError::Closed) => break Err(anyhow!("connection manager stopped")),
            },

            update = updates.recv() => match update {
                Ok(update) => {
                    print_update(&update);
                    if update.record.is_complete() {
                        println!("Draw complete.");
                        break Ok(());
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::debug!("Skipped {} intermediate updates", missed);
                }
                Err(RecvError::Closed) => break Ok(()),
            },

            _ = tokio::signal::ctrl_c() => {
                println!("Stopped.");
                break Ok(());
            }
        }
    };

    draw.close().await;
    outcome
}

fn print_update(update: &RevealUpdate) {
    let record = &update.record;
    let date = record
        .draw_date()
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "date pending".to_string());

    println!();
    println!(
        "{} ({}): {}/{} revealed, {}",
        record.station(),
        date,
        record.revealed_count(),
        drawlive_reveal::SLOT_COUNT,
        describe_pointer(update.pointer)
    );
    println!("{}", record_table(update));
    if record.is_complete() {
        println!("{}", projection_table(&update.projection));
    }
}
