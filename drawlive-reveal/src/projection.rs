//! Last-two-digit display tables derived from a [`DrawRecord`].

use crate::record::DrawRecord;
use crate::slot::{SlotKey, PRIZE_SLOT_COUNT};
use serde::Serialize;

/// Two-digit view of the prize slots.
///
/// `head_index[d]` lists the slots whose last two digits start with `d`,
/// `tail_index[d]` the slots whose last digit is `d`, both in precedence
/// order. The bonus code and pending slots are never indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayProjection {
    per_slot_digits: [Option<u8>; PRIZE_SLOT_COUNT],
    head_index: [Vec<SlotKey>; 10],
    tail_index: [Vec<SlotKey>; 10],
}

impl DisplayProjection {
    /// Last two digits of `key`, left-padded, or `None` while pending.
    pub fn last_two(&self, key: SlotKey) -> Option<String> {
        self.last_two_value(key).map(|n| format!("{:02}", n))
    }

    pub fn last_two_value(&self, key: SlotKey) -> Option<u8> {
        self.per_slot_digits.get(key.ordinal()).copied().flatten()
    }

    pub fn heads(&self, digit: u8) -> &[SlotKey] {
        self.head_index
            .get(digit as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn tails(&self, digit: u8) -> &[SlotKey] {
        self.tail_index
            .get(digit as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Last digits of every slot filed under head `digit`.
    pub fn tail_digits_for_head(&self, digit: u8) -> Vec<u8> {
        self.heads(digit)
            .iter()
            .filter_map(|key| self.last_two_value(*key))
            .map(|n| n % 10)
            .collect()
    }

    /// First digits of every slot filed under tail `digit`.
    pub fn head_digits_for_tail(&self, digit: u8) -> Vec<u8> {
        self.tails(digit)
            .iter()
            .filter_map(|key| self.last_two_value(*key))
            .map(|n| n / 10)
            .collect()
    }
}

/// Build the display tables. Pure, and total over any record.
pub fn project(record: &DrawRecord) -> DisplayProjection {
    let mut projection = DisplayProjection {
        per_slot_digits: [None; PRIZE_SLOT_COUNT],
        head_index: Default::default(),
        tail_index: Default::default(),
    };

    for key in SlotKey::prizes() {
        let Some(n) = record.value(key).and_then(last_two_digits) else {
            continue;
        };
        projection.per_slot_digits[key.ordinal()] = Some(n);
        projection.head_index[(n / 10) as usize].push(key);
        projection.tail_index[(n % 10) as usize].push(key);
    }

    projection
}

fn last_two_digits(value: &str) -> Option<u8> {
    let mut digits = value.bytes().rev().filter(u8::is_ascii_digit);
    let ones = digits.next()? - b'0';
    let tens = digits.next().map_or(0, |b| b - b'0');
    Some(tens * 10 + ones)
}
