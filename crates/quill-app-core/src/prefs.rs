// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Saved preferences for the hub service and its clients.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::ConfigDoc;

/// Default per-call timeout for socket clients, in milliseconds.
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 5_000;

/// Hub service preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HostPrefs {
    /// Socket path override; `None` uses the platform default.
    pub socket_path: Option<PathBuf>,
    /// Seed the in-memory store with demo records at startup.
    pub seed_demo: bool,
}

impl ConfigDoc for HostPrefs {
    const KEY: &'static str = "host_prefs";
}

/// Client preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientPrefs {
    /// Socket path override; `None` uses the platform default.
    pub socket_path: Option<PathBuf>,
    /// Per-call timeout in milliseconds.
    pub call_timeout_ms: u64,
    /// Identity announced in the handshake.
    pub agent_id: Option<String>,
}

impl Default for ClientPrefs {
    fn default() -> Self {
        Self {
            socket_path: None,
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            agent_id: None,
        }
    }
}

impl ConfigDoc for ClientPrefs {
    const KEY: &'static str = "client_prefs";
}
