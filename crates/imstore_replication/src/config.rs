//! Configuration for replication.

use std::net::SocketAddr;
use std::time::Duration;

/// Largest frame either side accepts: 32 MiB.
pub const MAX_FRAME_SIZE: usize = 32 * 1024 * 1024;

/// Configuration for a replication master or slave.
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Master to follow. `None` means this node is the master.
    pub master_addr: Option<String>,
    /// Address the master listens on for slaves.
    pub listen_addr: SocketAddr,
    /// Most records per catch-up batch.
    pub catchup_batch_size: usize,
    /// Most records per live batch.
    pub live_batch_size: usize,
    /// Longest a live record waits in the broadcaster.
    pub live_flush_interval: Duration,
    /// Deadline for every read on a replication connection.
    pub read_timeout: Duration,
    /// Deadline for connecting to the master.
    pub connect_timeout: Duration,
    /// Live batches queued per slave before it is dropped.
    pub client_queue_capacity: usize,
    /// Reconnect backoff for slaves.
    pub retry: RetryConfig,
}

impl ReplicationConfig {
    /// Creates a configuration with the master listening on `listen_addr`.
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            master_addr: None,
            listen_addr,
            catchup_batch_size: 5000,
            live_batch_size: 1000,
            live_flush_interval: Duration::from_secs(1),
            read_timeout: Duration::from_secs(5 * 60),
            connect_timeout: Duration::from_secs(10),
            client_queue_capacity: 16,
            retry: RetryConfig::default(),
        }
    }

    /// Follows the master at `addr`. An empty address keeps this node the
    /// master.
    pub fn with_master(mut self, addr: impl Into<String>) -> Self {
        let addr = addr.into();
        self.master_addr = if addr.is_empty() { None } else { Some(addr) };
        self
    }

    /// Sets the catch-up batch size.
    pub fn with_catchup_batch_size(mut self, size: usize) -> Self {
        self.catchup_batch_size = size;
        self
    }

    /// Sets the live batch size.
    pub fn with_live_batch_size(mut self, size: usize) -> Self {
        self.live_batch_size = size;
        self
    }

    /// Sets the live flush interval.
    pub fn with_live_flush_interval(mut self, interval: Duration) -> Self {
        self.live_flush_interval = interval;
        self
    }

    /// Sets the read deadline.
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Sets the per-slave queue capacity.
    pub fn with_client_queue_capacity(mut self, capacity: usize) -> Self {
        self.client_queue_capacity = capacity;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// True if this node follows a master.
    pub fn is_slave(&self) -> bool {
        self.master_addr.is_some()
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([0, 0, 0, 0], 13333)))
    }
}

/// Reconnect backoff.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Cap on the delay.
    pub max_delay: Duration,
    /// Growth per attempt.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% jitter.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Backoff from 100ms doubling to 60s, with jitter.
    pub fn new() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Delay before retry `attempt` (0-indexed; attempt 0 waits nothing).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay = self.initial_delay.as_secs_f64()
            * self
                .backoff_multiplier
                .powi(attempt.saturating_sub(1).min(64) as i32);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            let jitter = delay_secs * 0.25 * rand_jitter();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Cheap jitter in `[0, 1)` from the clock.
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos % 1000) / 1000.0
}
