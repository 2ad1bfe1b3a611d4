// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Configuration for Tangle

pub mod settings;

pub use settings::{
    LimitsConfig, McpServerConfig, ProviderConfig, RetryConfig, Settings, TimeoutConfig,
};
