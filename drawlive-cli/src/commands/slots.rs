use comfy_table::{presets::UTF8_FULL, Table};
use drawlive_reveal::SlotKey;

pub fn handle_slots() {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["#", "Slot", "Prize", "Width"]);

    for key in SlotKey::all() {
        let width = key
            .tier()
            .width()
            .map(|w| w.to_string())
            .unwrap_or_else(|| "code".to_string());
        table.add_row(vec![
            (key.ordinal() + 1).to_string(),
            key.to_string(),
            key.tier().label().to_string(),
            width,
        ]);
    }

    println!("Reveal order:");
    println!("{}", table);
}
