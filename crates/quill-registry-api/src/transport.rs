// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Transport port: send `(group, operation, input)`, receive a value or a
//! classified error. Socket, in-process and scripted transports all sit
//! behind this trait.

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::caller::Caller;
use crate::error::CallError;

/// A single procedure invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
    /// Group name.
    pub group: String,
    /// Operation name.
    pub operation: String,
    /// Structured input (`null` for none).
    pub input: Value,
}

impl CallRequest {
    /// Build a request.
    pub fn new(group: impl Into<String>, operation: impl Into<String>, input: Value) -> Self {
        Self {
            group: group.into(),
            operation: operation.into(),
            input,
        }
    }
}

/// Remote-operation transport.
///
/// The returned future must not borrow `self`: callers spawn it.
pub trait Transport: Send + Sync + 'static {
    /// Perform the call.
    fn call(&self, request: CallRequest) -> BoxFuture<'static, Result<Value, CallError>>;
}

/// Transport that dispatches straight into a [`Caller`].
///
/// Used by server-rendered pages, scripts and tests that want API behaviour
/// without a socket.
#[derive(Debug, Clone)]
pub struct InProcessTransport {
    caller: Caller,
}

impl InProcessTransport {
    /// Wrap a caller.
    pub fn new(caller: Caller) -> Self {
        Self { caller }
    }
}

impl Transport for InProcessTransport {
    fn call(&self, request: CallRequest) -> BoxFuture<'static, Result<Value, CallError>> {
        self.caller
            .call(&request.group, &request.operation, request.input)
    }
}

impl<T: Transport> Transport for std::sync::Arc<T> {
    fn call(&self, request: CallRequest) -> BoxFuture<'static, Result<Value, CallError>> {
        (**self).call(request)
    }
}
