//! Reveal state machine.
//!
//! A synchronous reducer: every input carries the current instant and the
//! machine reports when it next needs [`RevealMachine::on_timer`]. The async
//! driver in [`crate::live`] owns the clock; tests drive it by hand.

use crate::projection::{project, DisplayProjection};
use crate::record::DrawRecord;
use crate::slot::SlotKey;
use chrono::{DateTime, Utc};
use drawlive_core::{DrawEvent, DrawPayload, FieldPayload, Station};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RevealConfig {
    /// Incremental fields arriving within this window are applied together.
    #[serde(with = "millis")]
    pub debounce_window: Duration,
    /// Minimum spacing between two pointer recomputations.
    #[serde(with = "millis")]
    pub pointer_throttle: Duration,
}

impl Default for RevealConfig {
    fn default() -> Self {
        Self {
            debounce_window: Duration::from_millis(50),
            pointer_throttle: Duration::from_millis(300),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Visible,
    Hidden,
}

/// What subscribers see after each observable change.
#[derive(Debug, Clone)]
pub struct RevealUpdate {
    pub record: Arc<DrawRecord>,
    pub pointer: Option<SlotKey>,
    pub projection: Arc<DisplayProjection>,
}

#[derive(Debug, Clone)]
struct Buffered {
    value: String,
    timestamp: DateTime<Utc>,
}

pub struct RevealMachine {
    config: RevealConfig,
    record: Arc<DrawRecord>,
    projection: Arc<DisplayProjection>,
    pointer: Option<SlotKey>,
    visibility: Visibility,
    buffer: BTreeMap<SlotKey, Buffered>,
    flush_at: Option<Instant>,
    pointer_computed_at: Option<Instant>,
    pointer_due: Option<Instant>,
}

impl RevealMachine {
    pub fn new(station: Station, config: RevealConfig) -> Self {
        let record = DrawRecord::empty(station);
        let projection = project(&record);
        let pointer = record.reveal_pointer();

        Self {
            config,
            record: Arc::new(record),
            projection: Arc::new(projection),
            pointer,
            visibility: Visibility::Visible,
            buffer: BTreeMap::new(),
            flush_at: None,
            pointer_computed_at: None,
            pointer_due: None,
        }
    }

    pub fn station(&self) -> &Station {
        self.record.station()
    }

    pub fn record(&self) -> &DrawRecord {
        &self.record
    }

    pub fn projection(&self) -> &DisplayProjection {
        &self.projection
    }

    pub fn reveal_pointer(&self) -> Option<SlotKey> {
        self.pointer
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    /// Current state as an update, for late subscribers.
    pub fn snapshot(&self) -> RevealUpdate {
        RevealUpdate {
            record: self.record.clone(),
            pointer: self.pointer,
            projection: self.projection.clone(),
        }
    }

    /// Earliest instant at which [`Self::on_timer`] has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.flush_at, self.pointer_due) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// `received_at` stamps full records that carry no timestamp of their own.
    pub fn apply_event(
        &mut self,
        event: DrawEvent,
        now: Instant,
        received_at: DateTime<Utc>,
    ) -> Option<RevealUpdate> {
        match event {
            DrawEvent::IncrementalField(field) => {
                self.buffer_field(field, now);
                None
            }
            DrawEvent::Snapshot(payload) | DrawEvent::FullUpdate(payload) => {
                self.apply_full(&payload, now, received_at)
            }
        }
    }

    pub fn set_visibility(&mut self, visibility: Visibility, now: Instant) -> Option<RevealUpdate> {
        if visibility == self.visibility {
            return None;
        }
        self.visibility = visibility;
        tracing::debug!("Reveal view for {} is now {:?}", self.station(), visibility);

        let changed = match visibility {
            Visibility::Hidden => {
                self.pointer_due = None;
                self.pointer.take().is_some()
            }
            // resume without waiting out the throttle
            Visibility::Visible => self.recompute_pointer(now),
        };
        changed.then(|| self.snapshot())
    }

    /// Run whatever deadlines have passed.
    pub fn on_timer(&mut self, now: Instant) -> Option<RevealUpdate> {
        let pointer_before = self.pointer;
        let mut changed = false;

        if self.flush_at.is_some_and(|at| at <= now) {
            self.flush_at = None;
            let mut record = (*self.record).clone();
            if self.drain_buffer(&mut record) {
                self.store(record);
                self.schedule_pointer(now);
                changed = true;
            }
        }

        if self.pointer_due.is_some_and(|at| at <= now) {
            self.recompute_pointer(now);
        }

        (changed || self.pointer != pointer_before).then(|| self.snapshot())
    }

    fn buffer_field(&mut self, field: FieldPayload, now: Instant) {
        if let Some(station) = &field.station {
            if station != self.station() {
                tracing::debug!("Ignoring field for {} on {}", station, self.station());
                return;
            }
        }

        let key = match field.slot_key.parse::<SlotKey>() {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!("Dropping incremental field: {}", e);
                return;
            }
        };
        let value = field.value.trim();
        if let Err(e) = key.validate(value) {
            tracing::warn!("Dropping incremental field: {}", e);
            return;
        }

        let incoming = Buffered {
            value: value.to_string(),
            timestamp: field.timestamp,
        };
        match self.buffer.get(&key) {
            Some(held)
                if held.timestamp > incoming.timestamp
                    || (held.timestamp == incoming.timestamp && held.value >= incoming.value) => {}
            _ => {
                self.buffer.insert(key, incoming);
            }
        }

        if self.flush_at.is_none() {
            self.flush_at = Some(now + self.config.debounce_window);
        }
    }

    fn apply_full(
        &mut self,
        payload: &DrawPayload,
        now: Instant,
        received_at: DateTime<Utc>,
    ) -> Option<RevealUpdate> {
        let mut record = (*self.record).clone();
        // buffered fields belong to the current draw; settle them first
        let mut changed = self.drain_buffer(&mut record);
        self.flush_at = None;

        match record.merge_full(payload, received_at) {
            Ok(merge) => {
                for rejected in &merge.rejected {
                    tracing::warn!("Ignoring part of {} record: {}", payload.station, rejected);
                }
                changed |= merge.changed;
            }
            Err(e) => tracing::warn!("Ignoring full record: {}", e),
        }

        if !changed {
            return None;
        }
        self.store(record);
        self.schedule_pointer(now);
        Some(self.snapshot())
    }

    fn drain_buffer(&mut self, record: &mut DrawRecord) -> bool {
        let mut changed = false;
        for (key, buffered) in std::mem::take(&mut self.buffer) {
            let field = FieldPayload {
                slot_key: key.to_string(),
                value: buffered.value,
                timestamp: buffered.timestamp,
                station: None,
            };
            match record.merge_field(&field) {
                Ok(applied) => changed |= applied,
                Err(e) => tracing::warn!("Dropping buffered field: {}", e),
            }
        }
        changed
    }

    fn store(&mut self, record: DrawRecord) {
        self.projection = Arc::new(project(&record));
        self.record = Arc::new(record);
    }

    /// Recompute now if the throttle allows, otherwise arm the trailing edge.
    fn schedule_pointer(&mut self, now: Instant) {
        if self.visibility == Visibility::Hidden {
            return;
        }
        match self.pointer_computed_at {
            Some(last) if now < last + self.config.pointer_throttle => {
                if self.pointer_due.is_none() {
                    self.pointer_due = Some(last + self.config.pointer_throttle);
                }
            }
            _ => {
                self.recompute_pointer(now);
            }
        }
    }

    fn recompute_pointer(&mut self, now: Instant) -> bool {
        self.pointer_computed_at = Some(now);
        self.pointer_due = None;
        let next = self.record.reveal_pointer();
        let changed = next != self.pointer;
        if changed {
            tracing::debug!(
                "Reveal pointer for {}: {:?} -> {:?}",
                self.station(),
                self.pointer,
                next
            );
        }
        self.pointer = next;
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::Tier;
    use chrono::{NaiveDate, TimeZone};

    fn station() -> Station {
        Station::new("mien-bac")
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn field(key: &str, value: &str, secs: i64) -> DrawEvent {
        DrawEvent::IncrementalField(FieldPayload {
            slot_key: key.to_string(),
            value: value.to_string(),
            timestamp: Utc.timestamp_opt(1_714_560_000 + secs, 0).unwrap(),
            station: None,
        })
    }

    fn snapshot(slots: &[(&str, &str)]) -> DrawEvent {
        DrawEvent::Snapshot(DrawPayload {
            station: station(),
            draw_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            slots: slots
                .iter()
                .map(|(k, v)| (k.to_string(), Some(v.to_string())))
                .collect(),
            complete: false,
            timestamp: Some(Utc.timestamp_opt(1_714_560_000, 0).unwrap()),
        })
    }

    fn key(tier: Tier, index: u8) -> SlotKey {
        SlotKey::new(tier, index).unwrap()
    }

    fn received() -> DateTime<Utc> {
        Utc.timestamp_opt(1_714_560_000, 0).unwrap()
    }

    #[test]
    fn test_single_field_advances_pointer_after_debounce() {
        let t0 = Instant::now();
        let mut machine = RevealMachine::new(station(), RevealConfig::default());
        assert_eq!(machine.reveal_pointer(), Some(SlotKey::SPECIAL));

        assert!(machine.apply_event(field("specialPrize_0", "12345", 0), t0, received()).is_none());
        assert_eq!(machine.next_deadline(), Some(t0 + ms(50)));
        assert!(machine.on_timer(t0 + ms(49)).is_none());

        let update = machine.on_timer(t0 + ms(50)).expect("flush");
        assert_eq!(update.record.value(SlotKey::SPECIAL), Some("12345"));
        assert_eq!(update.pointer, Some(key(Tier::First, 0)));
        assert_eq!(machine.next_deadline(), None);
    }

    #[test]
    fn test_burst_coalesces_into_one_update() {
        let t0 = Instant::now();
        let mut machine = RevealMachine::new(station(), RevealConfig::default());

        let burst = [
            ("specialPrize_0", "12345"),
            ("firstPrize_0", "23456"),
            ("secondPrize_0", "34567"),
            ("secondPrize_1", "45678"),
            ("thirdPrize_0", "56789"),
        ];
        for (i, (k, v)) in burst.iter().enumerate() {
            assert!(machine
                .apply_event(field(k, v, i as i64), t0 + ms(i as u64 * 2), received())
                .is_none());
        }

        let update = machine.on_timer(t0 + ms(50)).expect("one flush");
        assert_eq!(update.record.revealed_count(), 5);
        assert_eq!(update.pointer, Some(key(Tier::Third, 1)));
        assert_eq!(machine.next_deadline(), None);
        assert!(machine.on_timer(t0 + ms(400)).is_none());
    }

    #[test]
    fn test_pointer_is_throttled_with_trailing_edge() {
        let t0 = Instant::now();
        let mut machine = RevealMachine::new(station(), RevealConfig::default());

        let first = machine
            .apply_event(snapshot(&[("specialPrize_0", "12345")]), t0, received())
            .unwrap();
        assert_eq!(first.pointer, Some(key(Tier::First, 0)));

        // record changes inside the throttle window, pointer holds
        let second = machine
            .apply_event(snapshot(&[("firstPrize_0", "23456")]), t0 + ms(100), received())
            .unwrap();
        assert_eq!(second.record.revealed_count(), 2);
        assert_eq!(second.pointer, Some(key(Tier::First, 0)));
        assert_eq!(machine.next_deadline(), Some(t0 + ms(300)));

        let trailing = machine.on_timer(t0 + ms(300)).expect("trailing edge");
        assert_eq!(trailing.pointer, Some(key(Tier::Second, 0)));
        assert_eq!(machine.next_deadline(), None);
    }

    #[test]
    fn test_visibility_suspends_and_resumes_pointer() {
        let t0 = Instant::now();
        let mut machine = RevealMachine::new(station(), RevealConfig::default());
        machine.apply_event(snapshot(&[("specialPrize_0", "12345")]), t0, received());

        let hidden = machine
            .set_visibility(Visibility::Hidden, t0 + ms(10))
            .unwrap();
        assert_eq!(hidden.pointer, None);
        assert!(machine
            .set_visibility(Visibility::Hidden, t0 + ms(20))
            .is_none());

        // data keeps flowing while hidden
        machine.apply_event(field("firstPrize_0", "23456", 1), t0 + ms(30), received());
        let update = machine.on_timer(t0 + ms(80)).unwrap();
        assert_eq!(update.record.revealed_count(), 2);
        assert_eq!(update.pointer, None);

        // inside the throttle window, yet resumes immediately
        let visible = machine
            .set_visibility(Visibility::Visible, t0 + ms(100))
            .unwrap();
        assert_eq!(visible.pointer, Some(key(Tier::Second, 0)));
        assert_eq!(visible.pointer, visible.record.reveal_pointer());
    }

    #[test]
    fn test_full_record_flushes_buffer_first() {
        let t0 = Instant::now();
        let mut machine = RevealMachine::new(station(), RevealConfig::default());

        machine.apply_event(field("specialPrize_0", "99999", 5), t0, received());
        let update = machine
            .apply_event(snapshot(&[("firstPrize_0", "23456")]), t0 + ms(10), received())
            .unwrap();

        assert_eq!(update.record.value(SlotKey::SPECIAL), Some("99999"));
        assert_eq!(update.record.revealed_count(), 2);
        assert_eq!(machine.next_deadline(), None);
    }

    #[test]
    fn test_buffer_keeps_newest_value_per_slot() {
        let t0 = Instant::now();
        let mut machine = RevealMachine::new(station(), RevealConfig::default());

        machine.apply_event(field("sixthPrize_0", "222", 9), t0, received());
        machine.apply_event(field("sixthPrize_0", "111", 3), t0 + ms(5), received());
        let update = machine.on_timer(t0 + ms(50)).unwrap();
        assert_eq!(update.record.value(key(Tier::Sixth, 0)), Some("222"));
    }

    #[test]
    fn test_invalid_and_foreign_fields_are_dropped() {
        let t0 = Instant::now();
        let mut machine = RevealMachine::new(station(), RevealConfig::default());

        machine.apply_event(field("specialPrize_0", "12", 0), t0, received());
        machine.apply_event(field("nope_0", "12345", 0), t0, received());
        let DrawEvent::IncrementalField(mut foreign) = field("specialPrize_0", "12345", 0) else {
            unreachable!()
        };
        foreign.station = Some(Station::new("mien-nam"));
        machine.apply_event(DrawEvent::IncrementalField(foreign), t0, received());

        assert_eq!(machine.next_deadline(), None);
        assert_eq!(machine.record().revealed_count(), 0);
    }

    #[test]
    fn test_unchanged_snapshot_emits_nothing() {
        let t0 = Instant::now();
        let mut machine = RevealMachine::new(station(), RevealConfig::default());
        assert!(machine
            .apply_event(snapshot(&[("specialPrize_0", "12345")]), t0, received())
            .is_some());
        assert!(machine
            .apply_event(snapshot(&[("specialPrize_0", "12345")]), t0 + ms(500), received())
            .is_none());
    }

    #[test]
    fn test_next_draw_fields_do_not_land_in_finished_record() {
        let t0 = Instant::now();
        let mut machine = RevealMachine::new(station(), RevealConfig::default());

        let DrawEvent::Snapshot(mut yesterday) = snapshot(&[("specialPrize_0", "11111")]) else {
            unreachable!()
        };
        yesterday.draw_date = NaiveDate::from_ymd_opt(2024, 4, 30).unwrap();
        yesterday.complete = true;
        let finished = machine
            .apply_event(DrawEvent::Snapshot(yesterday.clone()), t0, received())
            .unwrap();
        assert_eq!(finished.pointer, None);

        machine.apply_event(field("specialPrize_0", "99999", 86_400), t0 + ms(1000), received());
        let update = machine.on_timer(t0 + ms(1050)).expect("flush");
        assert_eq!(update.record.value(SlotKey::SPECIAL), Some("99999"));
        assert_eq!(update.pointer, Some(key(Tier::First, 0)));
        assert!(!update.record.is_complete());
        assert_eq!(update.record.draw_date(), None);

        assert!(machine
            .apply_event(DrawEvent::Snapshot(yesterday), t0 + ms(2000), received())
            .is_none());
        let today = machine
            .apply_event(snapshot(&[("firstPrize_0", "23456")]), t0 + ms(3000), received())
            .unwrap();
        assert_eq!(today.record.draw_date(), NaiveDate::from_ymd_opt(2024, 5, 1));
        assert_eq!(today.pointer, Some(key(Tier::Second, 0)));
    }

    #[test]
    fn test_untimestamped_snapshot_uses_receive_time() {
        let t0 = Instant::now();
        let mut machine = RevealMachine::new(station(), RevealConfig::default());

        let DrawEvent::Snapshot(mut payload) = snapshot(&[("specialPrize_0", "12345")]) else {
            unreachable!()
        };
        payload.timestamp = None;
        let update = machine
            .apply_event(DrawEvent::Snapshot(payload), t0, received())
            .unwrap();
        assert_eq!(update.record.slot(SlotKey::SPECIAL).updated_at, Some(received()));
        assert_eq!(update.record.last_updated(), Some(received()));
    }

    #[test]
    fn test_pointer_never_regresses() {
        let t0 = Instant::now();
        let mut machine = RevealMachine::new(station(), RevealConfig::default());
        let events = [
            snapshot(&[("specialPrize_0", "12345"), ("firstPrize_0", "23456")]),
            field("secondPrize_0", "34567", 1),
            snapshot(&[("specialPrize_0", "12345")]),
            field("firstPrize_0", "00000", -5),
        ];

        let mut now = t0;
        let mut last = SlotKey::SPECIAL;
        for event in events {
            machine.apply_event(event, now, received());
            now += ms(400);
            machine.on_timer(now);
            if let Some(pointer) = machine.reveal_pointer() {
                assert!(pointer >= last);
                last = pointer;
            }
        }
        assert_eq!(machine.record().value(key(Tier::First, 0)), Some("23456"));
        assert_eq!(last, key(Tier::Second, 1));
    }
}
