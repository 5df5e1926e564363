// Worker constants (no magic values)
use std::time::Duration;

/// Long-poll wait per receive call (20s, the usual managed-queue maximum)
pub const DEFAULT_RECEIVE_WAIT: Duration = Duration::from_secs(20);

/// Jobs requested per receive call
pub const DEFAULT_RECEIVE_BATCH: usize = 1;

/// Visibility window of a leased job (15 minutes)
/// Must cover a worst-case chunk between two lease heartbeats
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// How often an in-flight chunk extends its lease and flushes progress
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

/// Attempts per candidate before recording outcome ERROR
pub const MAX_SCAN_ATTEMPTS: u32 = 3;

/// Attempts for an ack before leaving the lease to expire
pub const ACK_MAX_ATTEMPTS: u32 = 5;

/// Backoff base after a failed receive (1s, doubling up to 60s)
pub const ERROR_RECOVERY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Upper bound of the receive-failure backoff
pub const ERROR_RECOVERY_MAX_DELAY: Duration = Duration::from_secs(60);

/// Default concurrent scan tasks per worker process
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Freshness window used by the status monitor (10 minutes)
pub const DEFAULT_LIVENESS_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Registrations without progress before a node is reported as crash-looping
pub const CRASH_LOOP_RESTART_THRESHOLD: u32 = 3;

/// Time a draining worker gets before the daemon escalates to abandon
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(120);
