// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Data shapes shared by the routers and their clients.

pub mod billing;
pub mod settings;
