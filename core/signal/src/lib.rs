// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

/// Resolves once the process is asked to stop. If no handler can be
/// registered the future never resolves, leaving shutdown to the other
/// termination paths.
pub async fn shutdown() {
    imp::shutdown().await
}

#[cfg(unix)]
mod imp {
    use tokio::signal::unix::{SignalKind, signal};
    use tracing::{error, info};

    pub(super) async fn shutdown() {
        tokio::select! {
            // this will handle interrupt signal by users
            _ = sig(SignalKind::interrupt(), "SIGINT") => {}
            // this will handle SIGTERM signal
            // e.g. k8s send this signal to stop the container
            _ = sig(SignalKind::terminate(), "SIGTERM") => {}
        };
    }

    async fn sig(kind: SignalKind, name: &str) {
        let mut stream = match signal(kind) {
            Ok(stream) => stream,
            Err(e) => {
                error!(target: "hoprelay::signal", error = %e, "failed to register {} handler", name);
                return std::future::pending().await;
            }
        };

        stream.recv().await;
        info!(
            target: "hoprelay::signal",
            "received signal {}, starting shutdown",
            name,
        );
    }
}

#[cfg(not(unix))]
mod imp {
    use tracing::{error, info};

    pub(super) async fn shutdown() {
        let mut stream = match tokio::signal::windows::ctrl_c() {
            Ok(stream) => stream,
            Err(e) => {
                error!(target: "hoprelay::signal", error = %e, "failed to register Ctrl-C handler");
                return std::future::pending().await;
            }
        };

        stream.recv().await;
        info!(
            target: "hoprelay::signal",
            "received signal Ctrl-C, starting shutdown",
        );
    }
}
