/// Widest availability or conflict window, in days. Bounds the size of the
/// rooms × days grid built per query.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 3 * 366;

/// Longest single stay, in days.
pub const MAX_STAY_DAYS: i64 = 366;

/// Reservations accepted in one INSERT.
pub const MAX_BATCH_SIZE: usize = 500;

pub const MAX_ROOMS_PER_TENANT: usize = 10_000;
pub const MAX_RESERVATIONS_PER_ROOM: usize = 100_000;

pub const MAX_HOLDER_LEN: usize = 50;
pub const MAX_PHONE_LEN: usize = 13;

pub const MAX_TENANTS: usize = 1_000;
pub const MAX_TENANT_NAME_LEN: usize = 64;

/// Dates outside this range are rejected at the SQL boundary.
pub const MIN_YEAR: i32 = 1970;
pub const MAX_YEAR: i32 = 9999;
