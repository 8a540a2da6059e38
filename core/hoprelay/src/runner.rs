// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span};

use hoprelay_datapath::{Relay, RelayConfig, RelayError};

use crate::args::Args;
use crate::build_info;
use crate::config::ConfigLoader;
use crate::runtime;

/// Async body: start the relay and forward until `cancellation_token` fires
/// or a transport error stops it.
pub async fn run_relay(
    relay_config: RelayConfig,
    drain_timeout: Duration,
    cancellation_token: CancellationToken,
) -> Result<(), RelayError> {
    let mut relay = Relay::start(&relay_config, drain_timeout).await?;
    info!(
        local_addr = %relay.local_addr(),
        next_hop = %relay_config.next_hop_endpoint(),
        "relay started"
    );

    relay.run(cancellation_token).await
}

/// Load the configuration, set up tracing, build the runtime and block until
/// the relay stops, either on a shutdown signal or on a fatal error.
pub fn run(args: &Args) -> Result<(), RelayError> {
    let mut config = match args.config() {
        Some(path) => ConfigLoader::new(path)?,
        None => ConfigLoader::default(),
    };

    let tracing_conf = config.tracing()?;
    tracing_conf.setup_tracing_subscriber();
    debug!(?tracing_conf);
    info!(build_info = %build_info::BUILD_INFO);

    let relay_config = args.apply(config.relay()?.clone());
    let relay_runtime = runtime::build(config.runtime()?)?;
    let drain_timeout = relay_runtime.config.drain_timeout();

    relay_runtime.runtime.block_on(
        async move {
            let cancellation_token = CancellationToken::new();

            let signal_token = cancellation_token.clone();
            tokio::spawn(async move {
                hoprelay_signal::shutdown().await;
                info!("received shutdown signal");
                signal_token.cancel();
            });

            run_relay(relay_config, drain_timeout, cancellation_token).await
        }
        .instrument(info_span!("relay_lifecycle")),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use hoprelay_datapath::errors::EXIT_SETUP_FAILURE;
    use tokio::net::TcpListener;
    use tracing_test::traced_test;

    #[tokio::test]
    async fn test_invalid_config_never_binds() {
        let config = RelayConfig::default().with_next_hop("*", 5555);
        let err = run_relay(config, Duration::from_secs(1), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
        assert_eq!(err.exit_code(), EXIT_SETUP_FAILURE);
    }

    #[tokio::test]
    async fn test_next_hop_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = RelayConfig::default()
            .with_bind("127.0.0.1", 0)
            .with_next_hop("127.0.0.1", port);
        let err = run_relay(config, Duration::from_secs(1), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Connect { .. }));
        assert_eq!(err.exit_code(), EXIT_SETUP_FAILURE);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_cancelled_relay_exits_cleanly() {
        let next_hop = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = next_hop.local_addr().unwrap().port();

        let config = RelayConfig::default()
            .with_bind("127.0.0.1", 0)
            .with_next_hop("127.0.0.1", port);

        let token = CancellationToken::new();
        let cancel = token.clone();
        let driver = async move {
            let _accepted = next_hop.accept().await.unwrap();
            cancel.cancel();
            // keep the next hop open until the relay is gone
            tokio::time::sleep(Duration::from_millis(200)).await;
        };

        let (result, _) = tokio::join!(run_relay(config, Duration::from_secs(1), token), driver);
        assert!(result.is_ok());
        assert!(logs_contain("relay started"));
        assert!(logs_contain("relay terminated"));
    }
}
