use std::fmt;

use serde::{Deserialize, Serialize};

/// The 16 bit TCP control-bits mask carried in IPFIX element 6.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Bitmask(u16);

pub const FLAG_FIN: Bitmask = Bitmask(1 << 0);
pub const FLAG_SYN: Bitmask = Bitmask(1 << 1);
pub const FLAG_RST: Bitmask = Bitmask(1 << 2);
pub const FLAG_PSH: Bitmask = Bitmask(1 << 3);
pub const FLAG_ACK: Bitmask = Bitmask(1 << 4);
pub const FLAG_URG: Bitmask = Bitmask(1 << 5);
pub const FLAG_ECE: Bitmask = Bitmask(1 << 6);
pub const FLAG_CWR: Bitmask = Bitmask(1 << 7);
pub const FLAG_NS: Bitmask = Bitmask(1 << 8);

impl Bitmask {
    /// Parses a raw JSON token holding the mask, either as a decimal
    /// integer or as a `0x`-prefixed hex string. Unparseable input
    /// yields the empty mask.
    pub fn parse(token: &str) -> Bitmask {
        let token = token.trim().trim_matches('"');
        let parsed = match token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
            Some(hex) => u16::from_str_radix(hex, 16),
            None => token.parse(),
        };
        Bitmask(parsed.unwrap_or_default())
    }

    pub fn set(&mut self, flag: Bitmask) {
        self.0 |= flag.0;
    }

    pub fn clear(&mut self, flag: Bitmask) {
        self.0 &= !flag.0;
    }

    pub fn toggle(&mut self, flag: Bitmask) {
        self.0 ^= flag.0;
    }

    pub fn has(self, flag: Bitmask) -> bool {
        self.0 & flag.0 != 0
    }
}

impl fmt::Display for Bitmask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}
