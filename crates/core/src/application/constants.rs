// Repository constants (no magic values)
use std::time::Duration;

/// Attempts at a version-guarded save before giving up with a conflict
pub const DEFAULT_MAX_SAVE_ATTEMPTS: u32 = 5;

/// Base sleep between save attempts; scaled linearly by the attempt number
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(10);
