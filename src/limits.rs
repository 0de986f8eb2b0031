use crate::model::{Millimes, Ms};

pub const MAX_VEHICLE_TYPES: usize = 10_000;
pub const MAX_UNITS_PER_VEHICLE_TYPE: usize = 1_000;
pub const MAX_RESERVATIONS_PER_VEHICLE_TYPE: usize = 200_000;
pub const MAX_BLACKOUTS_PER_UNIT: usize = 50_000;
pub const MAX_UNAVAILABILITY_PER_VEHICLE_TYPE: usize = 50_000;
pub const MAX_RATINGS_PER_VEHICLE_TYPE: usize = 100_000;

pub const MAX_PLATE_LEN: usize = 32;
pub const MAX_TEXT_LEN: usize = 1024;

/// One billion dinars. Keeps payment arithmetic far from `i64` limits.
pub const MAX_AMOUNT_MILLIMES: Millimes = 1_000_000_000_000;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Longest single reservation or blackout (~10 years).
pub const MAX_SPAN_DURATION_MS: Ms = 10 * 366 * 86_400_000;
/// Widest availability query window (~2 years).
pub const MAX_QUERY_WINDOW_MS: Ms = 2 * 366 * 86_400_000;
