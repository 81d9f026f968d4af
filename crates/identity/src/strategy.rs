use serde::{Deserialize, Serialize};

/// How a [`crate::generators::HardwareIdentifierEngine`] value should be
/// produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GenerationStrategy {
    Random,
    VendorBased(String),
    Realistic,
    Stealth,
    Custom(String),
}

/// OUI prefixes used by [`GenerationStrategy::Stealth`] MAC generation —
/// Apple, Intel, Dell, HP, in that order.
pub const STEALTH_VENDOR_OUIS: [[u8; 3]; 4] = [
    [0x00, 0x1B, 0x63],
    [0x00, 0x1B, 0x21],
    [0x00, 0x14, 0x22],
    [0x00, 0x1F, 0x29],
];
