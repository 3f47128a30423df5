pub mod inspect;
pub mod slots;
pub mod watch;

pub use inspect::handle_inspect;
pub use slots::handle_slots;
pub use watch::handle_watch;

use comfy_table::{presets::UTF8_FULL, Cell, Color, Table};
use drawlive_reveal::{DisplayProjection, RevealUpdate, SlotKey};

pub(crate) fn record_table(update: &RevealUpdate) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Prize", "Slot", "Value", "Last two", ""]);

    for (key, slot) in update.record.iter() {
        let value = slot.value.as_revealed().unwrap_or("...");
        let last_two = update.projection.last_two(key).unwrap_or_default();
        let is_pointer = update.pointer == Some(key);

        let marker = if is_pointer {
            Cell::new("<- next").fg(Color::Yellow)
        } else {
            Cell::new("")
        };
        let value_cell = if is_pointer {
            Cell::new(value).fg(Color::Yellow)
        } else {
            Cell::new(value)
        };

        table.add_row(vec![
            Cell::new(key.tier().label()),
            Cell::new(key.to_string()),
            value_cell,
            Cell::new(last_two),
            marker,
        ]);
    }

    table
}

pub(crate) fn projection_table(projection: &DisplayProjection) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Head", "Tails", "Tail", "Heads"]);

    for digit in 0..10u8 {
        table.add_row(vec![
            digit.to_string(),
            join_digits(&projection.tail_digits_for_head(digit)),
            digit.to_string(),
            join_digits(&projection.head_digits_for_tail(digit)),
        ]);
    }

    table
}

pub(crate) fn describe_pointer(pointer: Option<SlotKey>) -> String {
    match pointer {
        Some(key) => format!("next up: {}", key),
        None => "no pending slot".to_string(),
    }
}

fn join_digits(digits: &[u8]) -> String {
    digits
        .iter()
        .map(u8::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
