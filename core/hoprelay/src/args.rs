// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use clap::{ArgAction, Parser};

use hoprelay_config::EndpointAddress;
use hoprelay_datapath::RelayConfig;

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
pub struct Args {
    /// Sets a custom config file
    #[arg(long, env = "HOPRELAY_CONFIG", value_name = "FILE")]
    config: Option<String>,

    /// Interface the upstream endpoint binds to, `*` for all
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    myaddr: Option<String>,

    /// Port the upstream endpoint binds to
    #[arg(short = 'p', long, value_name = "PORT")]
    myport: Option<u16>,

    /// Address of the next hop
    #[arg(short = 'A', long, value_name = "ADDRESS")]
    nexthopaddr: Option<String>,

    /// Port of the next hop
    #[arg(short = 'P', long, value_name = "PORT")]
    nexthopport: Option<u16>,

    /// Upstream endpoint as a `tcp://host:port` address
    #[arg(long, value_name = "URI", conflicts_with_all = ["myaddr", "myport"])]
    bind: Option<EndpointAddress>,

    /// Next hop as a `tcp://host:port` address
    #[arg(long, value_name = "URI", conflicts_with_all = ["nexthopaddr", "nexthopport"])]
    next_hop: Option<EndpointAddress>,

    /// Print build information and exit
    #[arg(long, action = ArgAction::SetTrue)]
    version: bool,
}

impl Args {
    pub fn config(&self) -> Option<&str> {
        self.config.as_deref()
    }

    pub fn version(&self) -> bool {
        self.version
    }

    /// Apply the command line overrides on top of the loaded configuration.
    pub fn apply(&self, config: RelayConfig) -> RelayConfig {
        let (bind_address, bind_port) = match &self.bind {
            Some(bind) => (bind.host().to_string(), bind.port()),
            None => (
                self.myaddr.clone().unwrap_or(config.bind_address.clone()),
                self.myport.unwrap_or(config.bind_port),
            ),
        };
        let (next_hop_address, next_hop_port) = match &self.next_hop {
            Some(next_hop) => (next_hop.host().to_string(), next_hop.port()),
            None => (
                self.nexthopaddr
                    .clone()
                    .unwrap_or(config.next_hop_address.clone()),
                self.nexthopport.unwrap_or(config.next_hop_port),
            ),
        };

        config
            .with_bind(&bind_address, bind_port)
            .with_next_hop(&next_hop_address, next_hop_port)
    }
}
