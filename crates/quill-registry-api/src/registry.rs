// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Procedure groups and the router registry that aggregates them.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use serde_json::Value;

use crate::caller::Caller;
use crate::error::{CallError, RegistryError};
use crate::schema::Schema;

/// Ambient per-call data (current actor, session).
///
/// Handed to handlers behind an `Arc`, so groups can read it but never mutate it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Context {
    /// Authenticated actor, if any.
    pub actor: Option<String>,
    /// Session identifier assigned by the host.
    pub session_id: String,
}

impl Context {
    /// Anonymous context for a session.
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            actor: None,
            session_id: session_id.into(),
        }
    }

    /// Attach an actor identity.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }
}

/// Operation kind (query or mutation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// Read-only operation; cacheable.
    Query,
    /// State-mutating operation; never cached.
    Mutation,
}

/// Descriptor for a single registered operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcedureDef {
    /// Owning group name (filled in at registration).
    pub group: &'static str,
    /// Operation name.
    pub name: &'static str,
    /// Operation kind.
    pub kind: OpKind,
    /// Input schema.
    pub input: Schema,
    /// Output schema.
    pub output: Schema,
}

/// Async operation handler.
pub type Handler =
    Arc<dyn Fn(Arc<Context>, Value) -> BoxFuture<'static, Result<Value, CallError>> + Send + Sync>;

pub(crate) struct Procedure {
    pub(crate) def: ProcedureDef,
    pub(crate) handler: Handler,
}

/// Named collection of operations, built before registration.
#[derive(Default)]
pub struct ProcedureGroup {
    procedures: Vec<Procedure>,
}

impl fmt::Debug for ProcedureGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.procedures.iter().map(|p| p.def.name))
            .finish()
    }
}

impl ProcedureGroup {
    /// Empty group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a read-only operation.
    pub fn query<F, Fut>(self, name: &'static str, input: Schema, output: Schema, handler: F) -> Self
    where
        F: Fn(Arc<Context>, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, CallError>> + Send + 'static,
    {
        self.push(name, OpKind::Query, input, output, handler)
    }

    /// Declare a state-mutating operation.
    pub fn mutation<F, Fut>(
        self,
        name: &'static str,
        input: Schema,
        output: Schema,
        handler: F,
    ) -> Self
    where
        F: Fn(Arc<Context>, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, CallError>> + Send + 'static,
    {
        self.push(name, OpKind::Mutation, input, output, handler)
    }

    /// Operation names in declaration order.
    pub fn operations(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.procedures.iter().map(|p| p.def.name)
    }

    fn push<F, Fut>(
        mut self,
        name: &'static str,
        kind: OpKind,
        input: Schema,
        output: Schema,
        handler: F,
    ) -> Self
    where
        F: Fn(Arc<Context>, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, CallError>> + Send + 'static,
    {
        let handler: Handler =
            Arc::new(move |ctx: Arc<Context>, input: Value| handler(ctx, input).boxed());
        self.procedures.push(Procedure {
            def: ProcedureDef {
                group: "",
                name,
                kind,
                input,
                output,
            },
            handler,
        });
        self
    }
}

struct RegisteredGroup {
    name: &'static str,
    procedures: Vec<Procedure>,
    index: HashMap<&'static str, usize>,
}

/// Ordered mapping from group name to procedure group.
///
/// Registration order is preserved; [`Registry::procedures`] iterates in that
/// order, operations in declaration order.
#[derive(Default)]
pub struct Registry {
    groups: Vec<RegisteredGroup>,
    index: HashMap<&'static str, usize>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.groups.iter().map(|g| g.name))
            .finish()
    }
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `group` under `name`.
    ///
    /// Fails on a duplicate group name or a group declaring an operation twice;
    /// on failure the registry is unchanged.
    pub fn register(&mut self, name: &'static str, group: ProcedureGroup) -> Result<(), RegistryError> {
        if self.index.contains_key(name) {
            return Err(RegistryError::DuplicateGroup(name.to_string()));
        }
        let mut index = HashMap::with_capacity(group.procedures.len());
        let mut procedures = Vec::with_capacity(group.procedures.len());
        for mut procedure in group.procedures {
            if index.contains_key(procedure.def.name) {
                return Err(RegistryError::DuplicateOperation {
                    group: name.to_string(),
                    operation: procedure.def.name.to_string(),
                });
            }
            procedure.def.group = name;
            index.insert(procedure.def.name, procedures.len());
            procedures.push(procedure);
        }
        self.index.insert(name, self.groups.len());
        self.groups.push(RegisteredGroup {
            name,
            procedures,
            index,
        });
        Ok(())
    }

    /// Look up an operation descriptor.
    pub fn resolve(&self, group: &str, operation: &str) -> Result<&ProcedureDef, RegistryError> {
        self.procedure(group, operation).map(|p| &p.def)
    }

    /// Registered group names in registration order.
    pub fn group_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.groups.iter().map(|g| g.name)
    }

    /// Every descriptor, groups in registration order.
    pub fn procedures(&self) -> impl Iterator<Item = &ProcedureDef> + '_ {
        self.groups
            .iter()
            .flat_map(|g| g.procedures.iter().map(|p| &p.def))
    }

    /// Number of registered operations.
    pub fn len(&self) -> usize {
        self.groups.iter().map(|g| g.procedures.len()).sum()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Build an in-process caller bound to `context`.
    pub fn create_caller(self: &Arc<Self>, context: Context) -> Caller {
        Caller::new(Arc::clone(self), Arc::new(context))
    }

    pub(crate) fn procedure(&self, group: &str, operation: &str) -> Result<&Procedure, RegistryError> {
        self.index
            .get(group)
            .and_then(|&g| {
                let entry = &self.groups[g];
                entry.index.get(operation).map(|&p| &entry.procedures[p])
            })
            .ok_or_else(|| RegistryError::NotFound {
                group: group.to_string(),
                operation: operation.to_string(),
            })
    }
}
