use crate::error::{Result, RevealError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Total number of slots in a draw, including the bonus code.
pub const SLOT_COUNT: usize = 28;

/// Number of numeric prize slots.
pub const PRIZE_SLOT_COUNT: usize = 27;

/// Prize tiers in reveal precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tier {
    Special,
    First,
    Second,
    Third,
    Fourth,
    Fifth,
    Sixth,
    Seventh,
    /// The "maDB" draw code; not a number.
    BonusCode,
}

impl Tier {
    pub const ALL: [Tier; 9] = [
        Tier::Special,
        Tier::First,
        Tier::Second,
        Tier::Third,
        Tier::Fourth,
        Tier::Fifth,
        Tier::Sixth,
        Tier::Seventh,
        Tier::BonusCode,
    ];

    /// How many slots the tier has.
    pub fn count(self) -> u8 {
        match self {
            Tier::Special | Tier::First | Tier::BonusCode => 1,
            Tier::Second => 2,
            Tier::Third | Tier::Fifth => 6,
            Tier::Fourth | Tier::Seventh => 4,
            Tier::Sixth => 3,
        }
    }

    /// Digit width of the tier's values; `None` for the bonus code.
    pub fn width(self) -> Option<usize> {
        match self {
            Tier::Special | Tier::First | Tier::Second | Tier::Third => Some(5),
            Tier::Fourth | Tier::Fifth => Some(4),
            Tier::Sixth => Some(3),
            Tier::Seventh => Some(2),
            Tier::BonusCode => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Tier::Special => "Special",
            Tier::First => "First",
            Tier::Second => "Second",
            Tier::Third => "Third",
            Tier::Fourth => "Fourth",
            Tier::Fifth => "Fifth",
            Tier::Sixth => "Sixth",
            Tier::Seventh => "Seventh",
            Tier::BonusCode => "Code",
        }
    }

    fn wire_prefix(self) -> &'static str {
        match self {
            Tier::Special => "specialPrize",
            Tier::First => "firstPrize",
            Tier::Second => "secondPrize",
            Tier::Third => "thirdPrize",
            Tier::Fourth => "fourthPrize",
            Tier::Fifth => "fifthPrize",
            Tier::Sixth => "sixthPrize",
            Tier::Seventh => "seventhPrize",
            Tier::BonusCode => "maDB",
        }
    }

    /// Ordinal of the tier's first slot.
    fn offset(self) -> u8 {
        Tier::ALL
            .iter()
            .take_while(|tier| **tier != self)
            .map(|tier| tier.count())
            .sum()
    }
}

/// One slot of a draw, identified by its position in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey(u8);

impl SlotKey {
    pub const SPECIAL: SlotKey = SlotKey(0);
    pub const BONUS_CODE: SlotKey = SlotKey(PRIZE_SLOT_COUNT as u8);

    pub fn new(tier: Tier, index: u8) -> Option<Self> {
        (index < tier.count()).then(|| SlotKey(tier.offset() + index))
    }

    /// Every slot, in reveal precedence order.
    pub fn all() -> impl Iterator<Item = SlotKey> + Clone {
        (0..SLOT_COUNT as u8).map(SlotKey)
    }

    /// Every numeric prize slot, in precedence order.
    pub fn prizes() -> impl Iterator<Item = SlotKey> + Clone {
        (0..PRIZE_SLOT_COUNT as u8).map(SlotKey)
    }

    pub fn ordinal(self) -> usize {
        self.0 as usize
    }

    pub fn tier(self) -> Tier {
        Tier::ALL
            .iter()
            .copied()
            .find(|tier| self.0 < tier.offset() + tier.count())
            .unwrap_or(Tier::BonusCode)
    }

    pub fn index(self) -> u8 {
        self.0 - self.tier().offset()
    }

    pub fn is_prize(self) -> bool {
        self.tier() != Tier::BonusCode
    }

    /// Check that `value` has the shape this slot holds.
    pub fn validate(self, value: &str) -> Result<()> {
        let ok = match self.tier().width() {
            Some(width) => value.len() == width && value.bytes().all(|b| b.is_ascii_digit()),
            None => {
                !value.is_empty()
                    && value.len() <= 64
                    && value.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
            }
        };

        if ok {
            Ok(())
        } else {
            Err(RevealError::malformed(self.to_string(), value))
        }
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tier = self.tier();
        match tier {
            Tier::BonusCode => f.write_str(tier.wire_prefix()),
            _ => write!(f, "{}_{}", tier.wire_prefix(), self.index()),
        }
    }
}

impl FromStr for SlotKey {
    type Err = RevealError;

    fn from_str(s: &str) -> Result<Self> {
        let unknown = || RevealError::UnknownSlot(s.to_string());

        if s == Tier::BonusCode.wire_prefix() {
            return Ok(SlotKey::BONUS_CODE);
        }

        let (prefix, index) = s.split_once('_').ok_or_else(unknown)?;
        let tier = Tier::ALL
            .iter()
            .copied()
            .filter(|tier| *tier != Tier::BonusCode)
            .find(|tier| tier.wire_prefix() == prefix)
            .ok_or_else(unknown)?;
        let index: u8 = index.parse().map_err(|_| unknown())?;
        let key = SlotKey::new(tier, index).ok_or_else(unknown)?;

        // only the canonical spelling names a slot
        if key.to_string() != s {
            return Err(unknown());
        }
        Ok(key)
    }
}

impl Serialize for SlotKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SlotKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
