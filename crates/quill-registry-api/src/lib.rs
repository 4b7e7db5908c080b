// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Typed procedure registry for the Quill API.
//!
//! Operations are declared once, in [`ProcedureGroup`]s, and aggregated under
//! stable top-level names by a [`Registry`]. The same declaration backs the
//! in-process [`Caller`] (scripts, server-rendered pages) and, through a
//! [`Transport`], the client-side cache, so server and client cannot drift.
//!
//! The registry performs no I/O; groups own their side effects.

pub mod caller;
pub mod error;
pub mod registry;
pub mod schema;
pub mod transport;

pub use caller::Caller;
pub use error::{CallError, ErrorKind, RegistryError};
pub use registry::{Context, Handler, OpKind, ProcedureDef, ProcedureGroup, Registry};
pub use schema::{FieldDef, FieldIssue, FieldType, Schema};
pub use transport::{CallRequest, InProcessTransport, Transport};
