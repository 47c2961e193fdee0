use crate::model::Ms;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;

/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// A single shift may not exceed one day.
pub const MAX_SHIFT_DURATION_MS: Ms = 24 * 3_600_000;

pub const MAX_BREAK_MINUTES: u32 = 8 * 60;

pub const MAX_NOTES_LEN: usize = 2_000;

/// Records accepted from one window fetch.
pub const MAX_WINDOW_RECORDS: usize = 50_000;

pub const MAX_ORG_ID_LEN: usize = 128;
