//! Write-set flag bitset

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Flags carried by every replicated write-set.
    ///
    /// The bit values are part of the persisted fragment format and
    /// must never be renumbered.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct WriteSetFlags: u32 {
        /// First fragment of a transaction
        const TRX_START = 1 << 0;
        /// Final (committing) write-set of a transaction
        const TRX_END = 1 << 1;
        /// Transaction rollback event
        const ROLLBACK = 1 << 2;
        /// Total order isolation write-set
        const ISOLATION = 1 << 3;
        /// Must not be applied in parallel
        const PA_UNSAFE = 1 << 4;
        /// Commutative with concurrent write-sets
        const COMMUTATIVE = 1 << 5;
    }
}

impl WriteSetFlags {
    /// Decodes a persisted flag word, rejecting unknown bits.
    pub fn from_persisted(bits: u32) -> Option<Self> {
        Self::from_bits(bits)
    }

    /// True for a write-set that both starts and ends a transaction.
    pub fn is_complete(&self) -> bool {
        self.contains(Self::TRX_START | Self::TRX_END)
    }
}
