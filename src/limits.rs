//! Hard limits. Requests beyond these fail with `LimitExceeded`.

/// Widest `resolve` window, in days.
pub const MAX_QUERY_DAYS: i64 = 400;

/// Furthest a recurring block may reach past today, in days.
pub const MAX_RECURRING_HORIZON_DAYS: i64 = 2 * 366;

/// Furthest ahead a single day or slot may be blocked, in days.
pub const MAX_BLOCK_HORIZON_DAYS: i64 = 3 * 366;

pub const MAX_RECURRING_BLOCKS: usize = 512;

/// Labels per blockTimeSlot/unblockTimeSlot command.
pub const MAX_BATCH_SLOTS: usize = 96;

pub const MAX_REASON_LEN: usize = 500;

pub const MAX_TENANTS: usize = 1024;

pub const MAX_TENANT_NAME_LEN: usize = 128;

/// Attempts after the first for transient store I/O.
pub const STORE_RETRY_ATTEMPTS: u32 = 3;

pub const STORE_RETRY_BACKOFF_MS: u64 = 25;
