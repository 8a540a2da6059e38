// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::time::Instant;

use clap::Parser;
use display_error_chain::ErrorChainExt;
use tracing::{error, info};

use hoprelay_config::EndpointAddress;
use hoprelay_tracing::TracingConfiguration;
use testing::Requester;

#[derive(Parser, Debug)]
#[command(version, about = "Sends requests through a relay and logs the round trip latency", long_about = None)]
pub struct Args {
    /// Address of the first relay hop
    #[arg(short, long, value_name = "ADDRESS", default_value = "127.0.0.1")]
    addr: String,

    /// Port of the first relay hop
    #[arg(short, long, value_name = "PORT", default_value_t = 4444)]
    port: u16,

    /// Number of requests to send
    #[arg(short, long, value_name = "ITERS", default_value_t = 100)]
    iters: u32,

    /// Payload of every request
    #[arg(short, long, value_name = "MESSAGE", default_value = "HelloWorld")]
    message: String,
}

// routing hint carried as a metadata frame, alternating between two targets
fn routing_hint(iteration: u32) -> &'static str {
    if iteration % 2 == 0 { "5556" } else { "5555" }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    TracingConfiguration::default().setup_tracing_subscriber();

    let address = EndpointAddress::new(args.addr.as_str(), args.port);
    let mut requester = match Requester::connect(&address).await {
        Ok(requester) => requester,
        Err(e) => {
            error!(%address, error = %e.chain(), "unable to connect");
            std::process::exit(1);
        }
    };
    info!(%address, iters = args.iters, "requester connected");

    let mut latencies = Vec::with_capacity(args.iters as usize);
    for i in 0..args.iters {
        let start = Instant::now();
        let reply = match requester
            .request([routing_hint(i).to_string(), args.message.clone()])
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                error!(iteration = i, error = %e.chain(), "request failed");
                std::process::exit(2);
            }
        };
        let latency = start.elapsed();
        latencies.push(latency);

        info!(
            iteration = i,
            reply = %String::from_utf8_lossy(reply.payload()),
            ?latency,
            "received reply"
        );
    }

    if !latencies.is_empty() {
        let total: std::time::Duration = latencies.iter().sum();
        info!(mean = ?(total / latencies.len() as u32), "done");
    }
}
