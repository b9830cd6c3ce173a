use std::path::PathBuf;
use std::time::Duration;

/// Settings for talking to the indexer client binary.
///
/// The library never loads these on its own; the binary (or an embedding
/// editor) builds one and hands it to [`Session`](crate::session::Session)
/// or [`JobScheduler`](crate::scheduler::JobScheduler).
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Path to the `rc` client executable
    pub rc_path: PathBuf,
    /// Default timeout for one-shot queries without an explicit timeout
    pub rc_timeout: Duration,
    /// Timeout for full reindex runs
    pub reindex_timeout: Duration,
    /// Timeout for synchronous completion queries
    pub completion_timeout: Duration,
    /// Number of one-shot jobs allowed to run concurrently
    pub pool_size: usize,
    /// How long `cancel` waits for a job to acknowledge before aborting it
    pub cancel_grace: Duration,
    /// Maximum number of entries kept in the navigation history
    pub jump_limit: usize,
    /// Upper bound for a single buffered monitor element
    pub max_element_bytes: usize,
    /// Collect diagnostics from the monitor stream
    pub fixits: bool,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            rc_path: PathBuf::from("/usr/local/bin/rc"),
            rc_timeout: Duration::from_millis(500),
            reindex_timeout: Duration::from_secs(300),
            completion_timeout: Duration::from_secs(60),
            pool_size: 4,
            cancel_grace: Duration::from_secs(15),
            jump_limit: 10,
            max_element_bytes: 16 * 1024 * 1024,
            fixits: true,
        }
    }
}

impl IndexerConfig {
    pub fn new(rc_path: impl Into<PathBuf>) -> Self {
        Self {
            rc_path: rc_path.into(),
            ..Default::default()
        }
    }

    pub fn with_rc_timeout(mut self, timeout: Duration) -> Self {
        self.rc_timeout = timeout;
        self
    }

    pub fn with_reindex_timeout(mut self, timeout: Duration) -> Self {
        self.reindex_timeout = timeout;
        self
    }

    pub fn with_completion_timeout(mut self, timeout: Duration) -> Self {
        self.completion_timeout = timeout;
        self
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        // A zero-sized pool would block every submission forever.
        self.pool_size = pool_size.max(1);
        self
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    pub fn with_jump_limit(mut self, limit: usize) -> Self {
        self.jump_limit = limit;
        self
    }

    pub fn with_fixits(mut self, enabled: bool) -> Self {
        self.fixits = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indexer_config_default() {
        let cfg = IndexerConfig::default();
        assert_eq!(cfg.rc_path, PathBuf::from("/usr/local/bin/rc"));
        assert_eq!(cfg.rc_timeout, Duration::from_millis(500));
        assert_eq!(cfg.reindex_timeout, Duration::from_secs(300));
        assert_eq!(cfg.completion_timeout, Duration::from_secs(60));
        assert_eq!(cfg.pool_size, 4);
        assert_eq!(cfg.cancel_grace, Duration::from_secs(15));
        assert_eq!(cfg.jump_limit, 10);
        assert!(cfg.fixits);
    }

    #[test]
    fn indexer_config_new_keeps_defaults() {
        let cfg = IndexerConfig::new("/opt/rtags/bin/rc");
        assert_eq!(cfg.rc_path, PathBuf::from("/opt/rtags/bin/rc"));
        assert_eq!(cfg.pool_size, 4);
    }

    #[test]
    fn indexer_config_builders() {
        let cfg = IndexerConfig::new("rc")
            .with_rc_timeout(Duration::from_secs(2))
            .with_pool_size(8)
            .with_cancel_grace(Duration::from_millis(100))
            .with_jump_limit(3)
            .with_fixits(false);
        assert_eq!(cfg.rc_timeout, Duration::from_secs(2));
        assert_eq!(cfg.pool_size, 8);
        assert_eq!(cfg.cancel_grace, Duration::from_millis(100));
        assert_eq!(cfg.jump_limit, 3);
        assert!(!cfg.fixits);
    }

    #[test]
    fn zero_pool_size_is_clamped() {
        let cfg = IndexerConfig::default().with_pool_size(0);
        assert_eq!(cfg.pool_size, 1);
    }
}
