//! Reveal engine for live lottery draws.
//!
//! Turns the shared connection's draw events into a monotonic per-station
//! record, a throttled reveal pointer and two-digit display tables.

pub mod error;
pub mod live;
pub mod machine;
pub mod projection;
pub mod record;
pub mod slot;

pub use error::{Result, RevealError};
pub use live::{LiveDraw, Subscription};
pub use machine::{RevealConfig, RevealMachine, RevealUpdate, Visibility};
pub use projection::{project, DisplayProjection};
pub use record::{DrawRecord, FullMerge, Slot, SlotValue};
pub use slot::{SlotKey, Tier, PRIZE_SLOT_COUNT, SLOT_COUNT};

use drawlive_core::{ConnectionManager, Station};

/// Watch a station with the default reveal timings.
pub fn watch_station(
    manager: &ConnectionManager,
    credential: impl Into<String>,
    station: Station,
) -> LiveDraw {
    LiveDraw::watch(manager, credential, station, RevealConfig::default())
}
