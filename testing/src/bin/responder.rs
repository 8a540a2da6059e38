// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use display_error_chain::ErrorChainExt;
use tracing::{error, info};

use hoprelay_config::EndpointAddress;
use hoprelay_tracing::TracingConfiguration;
use testing::EchoResponder;

#[derive(Parser, Debug)]
#[command(version, about = "Terminal responder: answers PING with PONG and echoes anything else", long_about = None)]
pub struct Args {
    /// Interface to bind to, `*` for all
    #[arg(short, long, value_name = "ADDRESS", default_value = "*")]
    addr: String,

    /// Port to bind to
    #[arg(short, long, value_name = "PORT", default_value_t = 5555)]
    port: u16,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    TracingConfiguration::default().setup_tracing_subscriber();

    let address = EndpointAddress::new(args.addr.as_str(), args.port);
    let responder = match EchoResponder::bind(&address).await {
        Ok(responder) => responder,
        Err(e) => {
            error!(%address, error = %e.chain(), "unable to bind responder");
            std::process::exit(1);
        }
    };

    hoprelay_signal::shutdown().await;
    info!(handled = responder.handled(), "received shutdown signal");
    responder.shutdown().await;
}
