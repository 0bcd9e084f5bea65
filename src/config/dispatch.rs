use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DispatchConfig {
    /// Virtual nodes per real node on the hash ring.
    #[serde(default = "default_replicas")]
    pub replicas: usize,

    /// Number of concurrent sync workers.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Bounded worker-queue capacity; a full queue blocks the feeder.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Pause between full feeder passes over the owned set.
    #[serde(default = "default_feed_interval_in_ms")]
    pub feed_interval_in_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            replicas: default_replicas(),
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            feed_interval_in_ms: default_feed_interval_in_ms(),
        }
    }
}

impl DispatchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.replicas == 0 {
            return Err(Error::InvalidConfig("replicas must be greater than zero".into()));
        }

        if self.workers == 0 {
            return Err(Error::InvalidConfig("workers must be greater than zero".into()));
        }

        if self.queue_capacity == 0 {
            return Err(Error::InvalidConfig(
                "queue_capacity must be greater than zero".into(),
            ));
        }

        Ok(())
    }

    pub fn feed_interval(&self) -> Duration {
        Duration::from_millis(self.feed_interval_in_ms)
    }
}

fn default_replicas() -> usize {
    10
}

fn default_workers() -> usize {
    5
}

fn default_queue_capacity() -> usize {
    10
}

fn default_feed_interval_in_ms() -> u64 {
    1_000
}
