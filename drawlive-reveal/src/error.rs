use chrono::NaiveDate;
use drawlive_core::Station;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RevealError>;

#[derive(Error, Debug)]
pub enum RevealError {
    #[error("Unknown slot key: {0}")]
    UnknownSlot(String),

    #[error("Malformed value {value:?} for slot {slot}")]
    MalformedValue { slot: String, value: String },

    #[error("Draw for station {got} sent to the {expected} engine")]
    WrongStation { expected: Station, got: Station },

    #[error("Stale draw dated {incoming}, current draw is {current}")]
    StaleDraw {
        incoming: NaiveDate,
        current: NaiveDate,
    },
}

impl RevealError {
    pub fn malformed(slot: impl Into<String>, value: impl Into<String>) -> Self {
        Self::MalformedValue {
            slot: slot.into(),
            value: value.into(),
        }
    }
}
