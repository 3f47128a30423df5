use super::{describe_pointer, projection_table, record_table};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use drawlive_core::{DrawEvent, DrawPayload, ServerMessage};
use drawlive_reveal::{RevealConfig, RevealMachine, RevealUpdate};
use std::path::Path;
use tokio::time::Instant;

/// Replay a saved snapshot (or a list of server frames) through the engine.
pub async fn handle_inspect(file: &Path, reveal: RevealConfig, json: bool) -> Result<()> {
    let text = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let events = parse_events(&text)?;
    let update = replay(events, reveal)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&*update.record)?);
        return Ok(());
    }

    let record = &update.record;
    println!(
        "{} {}: {} revealed, {}{}",
        record.station(),
        record
            .draw_date()
            .map(|d| d.to_string())
            .unwrap_or_else(|| "(no date)".to_string()),
        record.revealed_count(),
        describe_pointer(update.pointer),
        if record.is_complete() { ", complete" } else { "" }
    );
    println!("{}", record_table(&update));
    println!("{}", projection_table(&update.projection));
    Ok(())
}

/// Accepts a bare draw payload, one server frame, or an array of frames.
fn parse_events(text: &str) -> Result<Vec<DrawEvent>> {
    let value: serde_json::Value = serde_json::from_str(text).context("file is not JSON")?;

    let frames = match value {
        serde_json::Value::Array(frames) => frames,
        other => vec![other],
    };

    frames
        .into_iter()
        .map(|frame| -> Result<Option<DrawEvent>> {
            if frame.get("event").is_some() {
                let message: ServerMessage = serde_json::from_value(frame)?;
                Ok(message.into_draw_event())
            } else {
                let payload: DrawPayload = serde_json::from_value(frame)?;
                Ok(Some(DrawEvent::Snapshot(payload)))
            }
        })
        .filter_map(Result::transpose)
        .collect()
}

fn replay(events: Vec<DrawEvent>, reveal: RevealConfig) -> Result<RevealUpdate> {
    let Some(station) = events.iter().find_map(|e| e.station().cloned()) else {
        bail!("no draw record in file");
    };

    let settle = reveal.debounce_window.max(reveal.pointer_throttle);
    let mut machine = RevealMachine::new(station, reveal);
    let mut now = Instant::now();
    let received_at = Utc::now();

    for event in events {
        machine.apply_event(event, now, received_at);
        now += settle;
        machine.on_timer(now);
    }

    Ok(machine.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;
    use drawlive_reveal::{SlotKey, Tier};

    #[test]
    fn test_bare_payload_replays_as_snapshot() {
        let events = parse_events(
            r#"{ "station": "mien-bac", "drawDate": "2024-05-01",
                 "slots": { "specialPrize_0": "12345", "firstPrize_0": null } }"#,
        )
        .unwrap();
        assert_eq!(events.len(), 1);

        let update = replay(events, RevealConfig::default()).unwrap();
        assert_eq!(update.record.value(SlotKey::SPECIAL), Some("12345"));
        assert_eq!(update.pointer, SlotKey::new(Tier::First, 0));
    }

    #[test]
    fn test_frame_list_skips_control_messages() {
        let events = parse_events(
            r#"[
                { "event": "connected_ack", "payload": {} },
                { "event": "snapshot", "payload": { "station": "mien-bac", "drawDate": "2024-05-01", "slots": {} } },
                { "event": "incremental_field", "payload": { "slotKey": "specialPrize_0", "value": "12345", "timestamp": "2024-05-01T11:15:00Z" } },
                { "event": "incremental_field", "payload": { "slotKey": "firstPrize_0", "value": "54321", "timestamp": "2024-05-01T11:16:00Z" } }
            ]"#,
        )
        .unwrap();
        assert_eq!(events.len(), 3);

        let update = replay(events, RevealConfig::default()).unwrap();
        assert_eq!(update.record.revealed_count(), 2);
        assert_eq!(update.pointer, SlotKey::new(Tier::Second, 0));
    }

    #[test]
    fn test_file_without_records_is_an_error() {
        let events = parse_events(r#"{ "event": "connected_ack", "payload": {} }"#).unwrap();
        assert!(replay(events, RevealConfig::default()).is_err());
    }
}
