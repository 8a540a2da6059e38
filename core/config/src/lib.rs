// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

pub mod address;
pub mod configuration;
pub mod errors;

pub use address::EndpointAddress;
pub use errors::ConfigError;
