// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-process caller: invokes registered operations without a network hop.

use std::sync::Arc;

use futures_util::future::{self, BoxFuture, FutureExt};
use serde_json::Value;
use tracing::{debug, error};

use crate::error::{CallError, REMOTE_OUTPUT_SHAPE};
use crate::registry::{Context, Registry};

/// Registry handle bound to one [`Context`].
#[derive(Clone)]
pub struct Caller {
    registry: Arc<Registry>,
    context: Arc<Context>,
}

impl std::fmt::Debug for Caller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Caller")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl Caller {
    pub(crate) fn new(registry: Arc<Registry>, context: Arc<Context>) -> Self {
        Self { registry, context }
    }

    /// Context every call made through this caller receives.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Registry this caller dispatches into.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Same registry, different context.
    pub fn with_context(&self, context: Context) -> Self {
        Self::new(Arc::clone(&self.registry), Arc::new(context))
    }

    /// Invoke `group.operation` with `input`.
    ///
    /// Input is validated before the handler runs; the handler's value is
    /// checked against the declared output schema before it is returned.
    pub fn call(
        &self,
        group: &str,
        operation: &str,
        input: Value,
    ) -> BoxFuture<'static, Result<Value, CallError>> {
        let procedure = match self.registry.procedure(group, operation) {
            Ok(p) => p,
            Err(err) => {
                error!(group, operation, "call to unregistered procedure");
                return future::ready(Err(err.into())).boxed();
            }
        };
        if let Err(issues) = procedure.def.input.validate(&input) {
            debug!(group, operation, issues = issues.len(), "input rejected");
            return future::ready(Err(CallError::validation(issues))).boxed();
        }
        let def = procedure.def;
        let pending = (procedure.handler)(Arc::clone(&self.context), input);
        async move {
            let value = pending.await?;
            if let Err(issues) = def.output.validate(&value) {
                error!(group = def.group, operation = def.name, ?issues, "handler output violates schema");
                return Err(CallError::remote(
                    REMOTE_OUTPUT_SHAPE,
                    format!("{}.{} returned an unexpected shape", def.group, def.name),
                ));
            }
            Ok(value)
        }
        .boxed()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::registry::ProcedureGroup;
    use crate::schema::{FieldDef, FieldType, Schema};
    use serde_json::json;

    const ECHO: &[FieldDef] = &[FieldDef::required("text", FieldType::String).min_len(1)];

    fn registry() -> Arc<Registry> {
        let group = ProcedureGroup::new()
            .query("whoami", Schema::Unit, Schema::Any, |ctx, _| async move {
                Ok(json!({ "actor": ctx.actor, "session": ctx.session_id }))
            })
            .query("echo", Schema::Object(ECHO), Schema::Object(ECHO), |_, input| async move {
                Ok(input)
            })
            .query("broken", Schema::Unit, Schema::Object(ECHO), |_, _| async {
                Ok(json!({ "text": 42 }))
            });
        let mut registry = Registry::new();
        registry.register("user", group).unwrap();
        Arc::new(registry)
    }

    #[tokio::test]
    async fn caller_passes_context_through() {
        let caller = registry().create_caller(Context::new("s-1").with_actor("ada"));
        let out = caller.call("user", "whoami", Value::Null).await.unwrap();
        assert_eq!(out, json!({ "actor": "ada", "session": "s-1" }));
    }

    #[tokio::test]
    async fn invalid_input_never_reaches_handler() {
        let caller = registry().create_caller(Context::default());
        let err = caller.call("user", "echo", json!({ "text": "" })).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn unknown_operation_is_not_found() {
        let caller = registry().create_caller(Context::default());
        let err = caller.call("user", "missing", Value::Null).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn output_shape_mismatch_is_remote_error() {
        let caller = registry().create_caller(Context::default());
        let err = caller.call("user", "broken", Value::Null).await.unwrap_err();
        assert!(matches!(err, CallError::Remote { ref code, .. } if code == REMOTE_OUTPUT_SHAPE));
    }
}
