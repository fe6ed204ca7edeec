//! System-wide constants for the Payrail engine.

/// Basis-point denominator (100% = 10 000 bps).
pub const BPS_DENOMINATOR: u32 = 10_000;

/// Default protocol fee taken from every settled amount, in basis points.
pub const DEFAULT_PROTOCOL_FEE_BPS: u32 = 10;

/// Default ceiling on an operator's commission, in basis points.
pub const DEFAULT_MAX_COMMISSION_BPS: u32 = 10_000;

/// First rail ID handed out by a fresh engine.
pub const FIRST_RAIL_ID: u64 = 1;

/// Version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine name.
pub const ENGINE_NAME: &str = "Payrail";
