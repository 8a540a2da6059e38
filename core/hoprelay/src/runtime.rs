// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use duration_str::deserialize_duration;
use serde::{Deserialize, Serialize};
use std::time;
use tokio::runtime::{Builder, Runtime};
use tracing::{info, warn};

use hoprelay_config::ConfigError;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RuntimeConfiguration {
    /// the number of cores to use for this runtime, 0 means all of them
    #[serde(default = "default_n_cores")]
    n_cores: usize,

    /// the thread name for the runtime
    #[serde(default = "default_thread_name")]
    thread_name: String,

    /// how long shutdown waits for connections to flush
    #[serde(
        default = "default_drain_timeout",
        deserialize_with = "deserialize_duration"
    )]
    drain_timeout: time::Duration,
}

impl Default for RuntimeConfiguration {
    fn default() -> Self {
        RuntimeConfiguration {
            n_cores: default_n_cores(),
            thread_name: default_thread_name(),
            drain_timeout: default_drain_timeout(),
        }
    }
}

fn default_n_cores() -> usize {
    // the forwarding loop is single threaded
    1
}

fn default_thread_name() -> String {
    "hoprelay".to_string()
}

fn default_drain_timeout() -> time::Duration {
    time::Duration::from_secs(10)
}

impl RuntimeConfiguration {
    pub fn new() -> Self {
        RuntimeConfiguration::default()
    }

    pub fn with_cores(self, n_cores: usize) -> Self {
        RuntimeConfiguration { n_cores, ..self }
    }

    pub fn with_thread_name(self, thread_name: &str) -> Self {
        RuntimeConfiguration {
            thread_name: thread_name.to_string(),
            ..self
        }
    }

    pub fn with_drain_timeout(self, drain_timeout: time::Duration) -> Self {
        RuntimeConfiguration {
            drain_timeout,
            ..self
        }
    }

    pub fn n_cores(&self) -> usize {
        self.n_cores
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    pub fn drain_timeout(&self) -> time::Duration {
        self.drain_timeout
    }
}

pub struct RelayRuntime {
    // Configuration field
    pub config: RuntimeConfiguration,

    // The actual runtime
    pub runtime: Runtime,
}

fn resolve_cores(requested: usize, n_cpu: usize) -> usize {
    if requested > n_cpu {
        warn!(
            requested,
            n_cpu, "requested more cores than available, using all available cores"
        );
        n_cpu
    } else if requested == 0 {
        info!(%n_cpu, "using all available cores");
        n_cpu
    } else {
        requested
    }
}

pub fn build(config: &RuntimeConfiguration) -> Result<RelayRuntime, ConfigError> {
    let n_cpu = num_cpus::get().max(1);
    let cores = resolve_cores(config.n_cores, n_cpu);

    let runtime = match cores {
        1 => {
            info!("using single-threaded runtime");
            Builder::new_current_thread()
                .enable_all()
                .thread_name(config.thread_name.as_str())
                .build()
        }
        _ => {
            info!(%cores, "using multi-threaded runtime");
            Builder::new_multi_thread()
                .enable_all()
                .thread_name(config.thread_name.as_str())
                .worker_threads(cores)
                .max_blocking_threads(cores)
                .build()
        }
    }
    .map_err(|e| ConfigError::Invalid(format!("failed to build runtime: {}", e)))?;

    Ok(RelayRuntime {
        config: config.clone(),
        runtime,
    })
}
