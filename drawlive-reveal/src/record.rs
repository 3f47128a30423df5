//! The engine's view of one draw.
//!
//! Merging never moves a slot backwards: a revealed value is only replaced
//! by a newer one, and an absent or pending value never clears it.

use crate::error::{Result, RevealError};
use crate::slot::{SlotKey, SLOT_COUNT};
use chrono::{DateTime, NaiveDate, Utc};
use drawlive_core::{DrawPayload, FieldPayload, Station};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum SlotValue {
    Pending,
    Revealed(String),
}

impl SlotValue {
    pub fn as_revealed(&self) -> Option<&str> {
        match self {
            SlotValue::Pending => None,
            SlotValue::Revealed(value) => Some(value),
        }
    }

    pub fn is_revealed(&self) -> bool {
        matches!(self, SlotValue::Revealed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub value: SlotValue,
    /// Server timestamp of the value currently held.
    pub updated_at: Option<DateTime<Utc>>,
}

impl Slot {
    fn pending() -> Self {
        Self {
            value: SlotValue::Pending,
            updated_at: None,
        }
    }

    /// Apply one observation. Returns true when the slot changed.
    ///
    /// The newer timestamp wins; on a tie the larger value wins so that
    /// arrival order never matters.
    fn observe(&mut self, value: &str, at: DateTime<Utc>) -> bool {
        let replace = match (&self.value, self.updated_at) {
            (SlotValue::Pending, _) => true,
            (SlotValue::Revealed(_), None) => true,
            (SlotValue::Revealed(current), Some(seen)) => {
                at > seen || (at == seen && value > current.as_str())
            }
        };

        if !replace {
            return false;
        }

        let changed = self.value.as_revealed() != Some(value);
        self.value = SlotValue::Revealed(value.to_string());
        self.updated_at = Some(at);
        changed
    }
}

/// Outcome of merging a full record.
#[derive(Debug, Default)]
pub struct FullMerge {
    pub changed: bool,
    /// Slot entries that could not be applied; the rest of the record was.
    pub rejected: Vec<RevealError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrawRecord {
    station: Station,
    draw_date: Option<NaiveDate>,
    slots: [Slot; SLOT_COUNT],
    server_complete: bool,
    last_updated: Option<DateTime<Utc>>,
    /// Date of a finished draw this record was started over from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    superseded: Option<NaiveDate>,
}

impl DrawRecord {
    /// A record with every slot pending and no draw date yet.
    pub fn empty(station: Station) -> Self {
        Self {
            station,
            draw_date: None,
            slots: std::array::from_fn(|_| Slot::pending()),
            server_complete: false,
            last_updated: None,
            superseded: None,
        }
    }

    pub fn station(&self) -> &Station {
        &self.station
    }

    pub fn draw_date(&self) -> Option<NaiveDate> {
        self.draw_date
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.last_updated
    }

    pub fn slot(&self, key: SlotKey) -> &Slot {
        &self.slots[key.ordinal()]
    }

    pub fn value(&self, key: SlotKey) -> Option<&str> {
        self.slot(key).value.as_revealed()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SlotKey, &Slot)> {
        SlotKey::all().zip(self.slots.iter())
    }

    pub fn revealed_count(&self) -> usize {
        self.slots.iter().filter(|s| s.value.is_revealed()).count()
    }

    /// The server declared the draw over, or every slot is revealed.
    pub fn is_complete(&self) -> bool {
        self.server_complete || self.revealed_count() == SLOT_COUNT
    }

    /// First pending slot in precedence order; `None` once complete.
    pub fn reveal_pointer(&self) -> Option<SlotKey> {
        if self.is_complete() {
            return None;
        }
        self.iter()
            .find(|(_, slot)| !slot.value.is_revealed())
            .map(|(key, _)| key)
    }

    /// Merge a snapshot or full update.
    ///
    /// A record for an older draw date is rejected as stale, and one for a
    /// newer date replaces the current record outright. `received_at` stands
    /// in for the payload timestamp when the server omits one.
    pub fn merge_full(
        &mut self,
        payload: &DrawPayload,
        received_at: DateTime<Utc>,
    ) -> Result<FullMerge> {
        if payload.station != self.station {
            return Err(RevealError::WrongStation {
                expected: self.station.clone(),
                got: payload.station.clone(),
            });
        }

        let mut merge = FullMerge::default();
        match self.draw_date {
            Some(current) if payload.draw_date < current => {
                return Err(RevealError::StaleDraw {
                    incoming: payload.draw_date,
                    current,
                });
            }
            Some(current) if payload.draw_date > current => {
                tracing::info!(
                    "New draw {} for {}, discarding {}",
                    payload.draw_date,
                    self.station,
                    current
                );
                *self = DrawRecord::empty(self.station.clone());
                self.draw_date = Some(payload.draw_date);
                merge.changed = true;
            }
            Some(_) => {}
            None => {
                if let Some(finished) = self.superseded.filter(|d| payload.draw_date <= *d) {
                    return Err(RevealError::StaleDraw {
                        incoming: payload.draw_date,
                        current: finished,
                    });
                }
                self.draw_date = Some(payload.draw_date);
                merge.changed = true;
            }
        }

        let at = payload.timestamp.unwrap_or(received_at);
        for (raw_key, raw_value) in &payload.slots {
            let key = match raw_key.parse::<SlotKey>() {
                Ok(key) => key,
                Err(e) => {
                    merge.rejected.push(e);
                    continue;
                }
            };
            let Some(value) = normalize(raw_value.as_deref()) else {
                continue;
            };
            if let Err(e) = key.validate(value) {
                merge.rejected.push(e);
                continue;
            }
            merge.changed |= self.slots[key.ordinal()].observe(value, at);
        }

        if payload.complete && !self.server_complete {
            self.server_complete = true;
            merge.changed = true;
        }

        if merge.changed {
            self.touch(at);
        }
        Ok(merge)
    }

    /// Merge one incremental field. Returns true when the record changed.
    ///
    /// Fields carry no draw date. Once the server has finished this draw, a
    /// field stamped after it starts a fresh record with an unknown date.
    pub fn merge_field(&mut self, field: &FieldPayload) -> Result<bool> {
        if let Some(station) = &field.station {
            if *station != self.station {
                return Err(RevealError::WrongStation {
                    expected: self.station.clone(),
                    got: station.clone(),
                });
            }
        }

        let key: SlotKey = field.slot_key.parse()?;
        let value = normalize(Some(&field.value))
            .ok_or_else(|| RevealError::malformed(key.to_string(), field.value.clone()))?;
        key.validate(value)?;

        let mut changed = false;
        if self.belongs_to_later_draw(field.timestamp) {
            tracing::info!(
                "Field {} for {} arrived after the draw finished, starting a new record",
                key,
                self.station
            );
            let finished = self.draw_date.or(self.superseded);
            *self = DrawRecord::empty(self.station.clone());
            self.superseded = finished;
            changed = true;
        }

        changed |= self.slots[key.ordinal()].observe(value, field.timestamp);
        if changed {
            self.touch(field.timestamp);
        }
        Ok(changed)
    }

    fn belongs_to_later_draw(&self, at: DateTime<Utc>) -> bool {
        if !self.server_complete {
            return false;
        }
        match self.draw_date {
            Some(date) => at.date_naive() > date,
            None => self.last_updated.map_or(true, |seen| at > seen),
        }
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        self.last_updated = Some(self.last_updated.map_or(at, |prev| prev.max(at)));
    }
}

/// Blank values mean "not drawn yet".
fn normalize(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
