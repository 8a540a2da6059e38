// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::process::ExitCode;

use clap::Parser;
use display_error_chain::ErrorChainExt;
use tracing::{error, info};

use hoprelay::args;
use hoprelay::build_info;
use hoprelay::runner;
use hoprelay_datapath::errors::EXIT_CLEAN;
use hoprelay_tracing::TracingConfiguration;

fn main() -> ExitCode {
    let args = args::Args::parse();

    // If the version flag is set, print the build info and exit
    if args.version() {
        println!("{}", build_info::BUILD_INFO);
        return ExitCode::from(EXIT_CLEAN);
    }

    match runner::run(&args) {
        Ok(()) => {
            info!("relay stopped");
            ExitCode::from(EXIT_CLEAN)
        }
        Err(e) => {
            // no-op if the configuration was loaded far enough to set it up
            TracingConfiguration::default().setup_tracing_subscriber();
            error!(error = %e.chain(), exit_code = e.exit_code(), "relay failed");
            ExitCode::from(e.exit_code())
        }
    }
}
