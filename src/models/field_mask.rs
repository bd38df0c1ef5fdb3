//! Field-selection bitmask controlling which record sections are reconstructed on read.

use serde::{Deserialize, Serialize};
use std::ops::{BitOr, BitOrAssign};

use super::Document;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMask(u32);

impl FieldMask {
    pub const CORE: FieldMask = FieldMask(1);
    pub const ACCOUNTS: FieldMask = FieldMask(1 << 1);
    pub const INSTRUCTIONS: FieldMask = FieldMask(1 << 2);
    pub const TOKEN_BALANCES: FieldMask = FieldMask(1 << 3);
    pub const CLASSIFICATION: FieldMask = FieldMask(1 << 4);
    pub const PARTIES: FieldMask = FieldMask(1 << 5);
    pub const ALL: FieldMask = FieldMask((1 << 6) - 1);

    /// Section names in the stored document, paired with their bit
    const SECTIONS: [(&'static str, FieldMask); 6] = [
        ("core", Self::CORE),
        ("accounts", Self::ACCOUNTS),
        ("instructions", Self::INSTRUCTIONS),
        ("token_balances", Self::TOKEN_BALANCES),
        ("classification", Self::CLASSIFICATION),
        ("parties", Self::PARTIES),
    ];

    /// Unknown bits are dropped; `CORE` is always set.
    pub const fn from_bits(bits: u32) -> Self {
        FieldMask((bits & Self::ALL.0) | Self::CORE.0)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: FieldMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn section_bit(section: &str) -> Option<FieldMask> {
        Self::SECTIONS
            .iter()
            .find(|(name, _)| *name == section)
            .map(|(_, bit)| *bit)
    }

    /// Reconstruct only the selected sections of a sectioned document.
    ///
    /// Keys that are not known sections survive only a full (`ALL`) read.
    /// Non-object documents are returned unchanged.
    pub fn project(self, document: &Document) -> Document {
        let Some(object) = document.as_object() else {
            return document.clone();
        };
        if self.contains(Self::ALL) {
            return document.clone();
        }
        let projected = object
            .iter()
            .filter(|(key, _)| match Self::section_bit(key) {
                Some(bit) => self.contains(bit),
                None => false,
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Document::Object(projected)
    }
}

impl Default for FieldMask {
    fn default() -> Self {
        Self::ALL
    }
}

impl BitOr for FieldMask {
    type Output = FieldMask;

    fn bitor(self, rhs: FieldMask) -> FieldMask {
        FieldMask::from_bits(self.0 | rhs.0)
    }
}

impl BitOrAssign for FieldMask {
    fn bitor_assign(&mut self, rhs: FieldMask) {
        *self = *self | rhs;
    }
}
