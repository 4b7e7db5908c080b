// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared application services for Quill (config, prefs, toasts, formatting).
//! Keeps the service binary and client views thin and framework-agnostic.

pub mod config;
pub mod format;
pub mod prefs;
pub mod toast;
