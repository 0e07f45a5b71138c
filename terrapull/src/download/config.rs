//! Download job configuration.

use std::thread::available_parallelism;

use crate::provider::RetryConfig;
use crate::tiler::TileLimits;

/// Tunables for one download job, with builder-style setters.
///
/// Defaults: worker pool of `available_parallelism - 1` (at least 1), the
/// remote service's documented tile limits, the default retry policy, and no
/// overwriting of existing files.
#[derive(Clone, Debug, Default)]
pub struct DownloadConfig {
    workers: Option<usize>,
    tile_limits: TileLimits,
    retry: RetryConfig,
    overwrite: bool,
}

impl DownloadConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixes the worker pool size instead of deriving it from the machine.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers.max(1));
        self
    }

    pub fn with_tile_limits(mut self, limits: TileLimits) -> Self {
        self.tile_limits = limits;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Allows replacing an existing destination file.
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Effective worker pool size.
    pub fn worker_count(&self) -> usize {
        match self.workers {
            Some(workers) => workers,
            None => available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2)
                .saturating_sub(1)
                .max(1),
        }
    }

    pub fn tile_limits(&self) -> &TileLimits {
        &self.tile_limits
    }

    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    pub fn overwrite(&self) -> bool {
        self.overwrite
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_worker_count_is_at_least_one() {
        assert!(DownloadConfig::new().worker_count() >= 1);
    }

    #[test]
    fn test_explicit_worker_count_is_clamped_to_one() {
        assert_eq!(DownloadConfig::new().with_workers(0).worker_count(), 1);
        assert_eq!(DownloadConfig::new().with_workers(8).worker_count(), 8);
    }

    #[test]
    fn test_builder_setters() {
        let limits = TileLimits {
            max_tile_bytes: 1024,
            max_tile_dim: 64,
        };
        let config = DownloadConfig::new()
            .with_tile_limits(limits)
            .with_overwrite(true)
            .with_retry(RetryConfig::default().with_retries(1));
        assert_eq!(config.tile_limits(), &limits);
        assert!(config.overwrite());
        assert_eq!(config.retry().retries, 1);
    }
}
