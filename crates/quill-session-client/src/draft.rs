// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Schema-validated drafts bound to a mutation.
//!
//! A [`Draft`] holds the last known-good server value (the baseline) and the
//! value being edited. Every edit re-validates against the mutation's input
//! schema. Submitting runs the domain rules locally first; only a payload
//! that passes them reaches the transport. On success the declared queries
//! are invalidated; on failure nothing cached changes and the edited value
//! is kept for a retry.

use std::fmt;
use std::time::Instant;

use quill_app_core::toast::{ToastKind, ToastMessage, ToastService, DEFAULT_TOAST_TTL};
use quill_registry_api::error::REMOTE_DATABASE;
use quill_registry_api::{CallError, FieldIssue, Schema, Transport};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::QueryCache;

/// Query (or whole group) to invalidate after a successful mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidationTarget {
    /// Group name.
    pub group: &'static str,
    /// Operation name; `None` targets every query of the group.
    pub operation: Option<&'static str>,
}

impl InvalidationTarget {
    /// Every query of `group`.
    pub const fn group(group: &'static str) -> Self {
        Self {
            group,
            operation: None,
        }
    }

    /// One query.
    pub const fn query(group: &'static str, operation: &'static str) -> Self {
        Self {
            group,
            operation: Some(operation),
        }
    }
}

/// A mutation plus the queries it is declared to affect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationBinding {
    /// Group name.
    pub group: &'static str,
    /// Mutation name.
    pub operation: &'static str,
    /// Queries to invalidate on success.
    pub invalidates: &'static [InvalidationTarget],
}

/// Lifecycle of a draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftState {
    /// Value equals the baseline.
    Clean,
    /// Edited; fails schema validation.
    DirtyInvalid,
    /// Edited; passes schema validation.
    DirtyValid,
    /// Mutation in flight.
    Submitting,
    /// Last mutation succeeded; baseline is the server's value.
    Submitted,
    /// Last mutation failed; value untouched.
    Failed,
}

/// Keeps a draft in [`DraftState::Submitting`] while its mutation runs.
///
/// Dropped without [`PendingSubmit::settle`] (the submitting future was
/// cancelled), it puts the prior state back so the draft can be sent again.
struct PendingSubmit<'a> {
    state: &'a mut DraftState,
    prior: Option<DraftState>,
}

impl<'a> PendingSubmit<'a> {
    fn begin(state: &'a mut DraftState) -> Self {
        let prior = Some(std::mem::replace(state, DraftState::Submitting));
        Self { state, prior }
    }

    fn settle(mut self) {
        self.prior = None;
    }
}

impl Drop for PendingSubmit<'_> {
    fn drop(&mut self) {
        if let Some(prior) = self.prior.take() {
            debug!(?prior, "submit cancelled; draft state restored");
            *self.state = prior;
        }
    }
}

/// Why a submit did not produce a server value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SubmitError {
    /// Nothing to send (clean, or already submitted).
    #[error("nothing to submit")]
    Unchanged,
    /// A submit is already running.
    #[error("a submit is already in flight")]
    InFlight,
    /// No failed payload to retry.
    #[error("nothing to retry")]
    NothingToRetry,
    /// Rejected locally or by the remote side.
    #[error(transparent)]
    Call(#[from] CallError),
}

impl SubmitError {
    /// Underlying call error, if any.
    pub fn call_error(&self) -> Option<&CallError> {
        match self {
            Self::Call(err) => Some(err),
            _ => None,
        }
    }
}

/// User-facing rendering of an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    /// Toast title.
    pub title: String,
    /// Toast body.
    pub description: String,
    /// Whether offering "Try again" makes sense.
    pub retryable: bool,
}

impl Notice {
    /// Classify `err` by its kind tag.
    pub fn from_error(err: &CallError) -> Self {
        let (title, description) = match err {
            CallError::Validation { message, .. } => ("Validation Failed", message.clone()),
            CallError::MissingCredentials { message, .. } => ("Missing Credentials", message.clone()),
            CallError::Transport { .. } => (
                "Connection Problem",
                "Unable to reach the server. Please check your connection and try again.".to_string(),
            ),
            CallError::Remote { code, .. } if code == REMOTE_DATABASE => (
                "Database Error",
                "Unable to save settings. Please check your connection and try again.".to_string(),
            ),
            CallError::Remote { .. } => (
                "Update Failed",
                "Failed to update settings. Please try again.".to_string(),
            ),
            CallError::NotFound { .. } => (
                "Internal Error",
                "This action is not available. Please contact support.".to_string(),
            ),
        };
        Self {
            title: title.to_string(),
            description,
            retryable: err.is_retryable(),
        }
    }

    /// Toast for this notice; retryable notices carry a "Try again" action.
    pub fn to_toast(&self) -> ToastMessage {
        let toast =
            ToastMessage::new(ToastKind::Error, self.title.clone()).with_body(self.description.clone());
        if self.retryable {
            toast.with_action("Try again")
        } else {
            toast
        }
    }
}

/// Cross-field rule evaluated before the transport is touched.
pub type DomainRule<V> = Box<dyn Fn(&V) -> Result<(), CallError> + Send + Sync>;

/// Edit session bound to one mutation.
pub struct Draft<V> {
    binding: MutationBinding,
    schema: Schema,
    rules: Vec<DomainRule<V>>,
    issue_titles: Vec<(&'static str, &'static str)>,
    baseline: V,
    value: V,
    state: DraftState,
    issues: Vec<FieldIssue>,
    last_payload: Option<Value>,
    last_error: Option<CallError>,
}

impl<V: fmt::Debug> fmt::Debug for Draft<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Draft")
            .field("binding", &self.binding)
            .field("state", &self.state)
            .field("value", &self.value)
            .field("issues", &self.issues)
            .field("last_error", &self.last_error)
            .finish_non_exhaustive()
    }
}

impl<V> Draft<V>
where
    V: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync,
{
    /// Clean draft over `baseline`. `schema` is the mutation's input schema.
    pub fn new(binding: MutationBinding, schema: Schema, baseline: V) -> Self {
        Self {
            binding,
            schema,
            rules: Vec::new(),
            issue_titles: Vec::new(),
            value: baseline.clone(),
            baseline,
            state: DraftState::Clean,
            issues: Vec::new(),
            last_payload: None,
            last_error: None,
        }
    }

    /// Add a domain rule; rules run in the order added.
    pub fn with_rule<F>(mut self, rule: F) -> Self
    where
        F: Fn(&V) -> Result<(), CallError> + Send + Sync + 'static,
    {
        self.rules.push(Box::new(rule));
        self
    }

    /// Use `title` for validation notices whose first issue is on `field`.
    pub fn with_issue_title(mut self, field: &'static str, title: &'static str) -> Self {
        self.issue_titles.push((field, title));
        self
    }

    /// Mutation this draft submits to.
    pub fn binding(&self) -> &MutationBinding {
        &self.binding
    }

    /// Value being edited.
    pub fn value(&self) -> &V {
        &self.value
    }

    /// Last known-good server value.
    pub fn baseline(&self) -> &V {
        &self.baseline
    }

    /// Current state.
    pub fn state(&self) -> DraftState {
        self.state
    }

    /// Schema issues of the current value.
    pub fn issues(&self) -> &[FieldIssue] {
        &self.issues
    }

    /// Error of the last submit or retry.
    pub fn last_error(&self) -> Option<&CallError> {
        self.last_error.as_ref()
    }

    /// Payload of the last transport submission.
    pub fn last_payload(&self) -> Option<&Value> {
        self.last_payload.as_ref()
    }

    /// Whether a submit would reach the domain rules.
    pub fn can_submit(&self) -> bool {
        matches!(self.state, DraftState::DirtyValid | DraftState::Failed)
    }

    /// Apply an edit and re-validate.
    pub fn edit(&mut self, f: impl FnOnce(&mut V)) {
        f(&mut self.value);
        self.revalidate();
    }

    /// Replace the value and re-validate.
    pub fn set(&mut self, value: V) {
        self.value = value;
        self.revalidate();
    }

    /// Adopt a server value as both baseline and value.
    pub fn reset_to(&mut self, server: V) {
        self.baseline = server.clone();
        self.value = server;
        self.issues.clear();
        self.last_error = None;
        self.state = DraftState::Clean;
    }

    fn encode(&self) -> Result<Value, CallError> {
        serde_json::to_value(&self.value).map_err(|e| CallError::invalid_field("$", e.to_string()))
    }

    fn revalidate(&mut self) {
        if self.value == self.baseline {
            self.issues.clear();
            self.state = DraftState::Clean;
            return;
        }
        self.issues = match self.encode() {
            Ok(payload) => self.schema.validate(&payload).err().unwrap_or_default(),
            Err(CallError::Validation { issues, .. }) => issues,
            Err(_) => Vec::new(),
        };
        self.state = if self.issues.is_empty() {
            DraftState::DirtyValid
        } else {
            DraftState::DirtyInvalid
        };
    }

    /// Schema plus domain rules, without touching the transport.
    pub fn check(&self) -> Result<Value, CallError> {
        let payload = self.encode()?;
        self.schema.validate(&payload).map_err(CallError::validation)?;
        for rule in &self.rules {
            rule(&self.value)?;
        }
        Ok(payload)
    }

    /// Validate, run domain rules, then send the mutation.
    ///
    /// Local rejections leave the state as it was and never reach the
    /// transport. On success the baseline becomes the server's value and the
    /// binding's queries are invalidated.
    pub async fn submit<T: Transport>(&mut self, cache: &QueryCache<T>) -> Result<Value, SubmitError> {
        match self.state {
            DraftState::Submitting => return Err(SubmitError::InFlight),
            DraftState::Clean | DraftState::Submitted => return Err(SubmitError::Unchanged),
            DraftState::DirtyInvalid | DraftState::DirtyValid | DraftState::Failed => {}
        }
        let payload = match self.check() {
            Ok(payload) => payload,
            Err(err) => {
                debug!(
                    group = self.binding.group,
                    operation = self.binding.operation,
                    kind = ?err.kind(),
                    "submit rejected locally"
                );
                if let CallError::Validation { issues, .. } = &err {
                    self.issues.clone_from(issues);
                }
                self.last_error = Some(err.clone());
                return Err(err.into());
            }
        };
        self.send(cache, payload).await
    }

    /// Re-send the exact payload of the last failed submission, even if the
    /// value has been edited since.
    pub async fn retry<T: Transport>(&mut self, cache: &QueryCache<T>) -> Result<Value, SubmitError> {
        if self.state == DraftState::Submitting {
            return Err(SubmitError::InFlight);
        }
        match (&self.last_payload, &self.last_error) {
            (Some(payload), Some(err)) if err.is_retryable() => {
                let payload = payload.clone();
                self.send(cache, payload).await
            }
            _ => Err(SubmitError::NothingToRetry),
        }
    }

    async fn send<T: Transport>(&mut self, cache: &QueryCache<T>, payload: Value) -> Result<Value, SubmitError> {
        let MutationBinding {
            group,
            operation,
            invalidates,
        } = self.binding;
        self.last_payload = Some(payload.clone());
        let result = {
            let pending = PendingSubmit::begin(&mut self.state);
            let result = cache.mutate(group, operation, payload.clone()).await;
            pending.settle();
            result
        };
        match result {
            Ok(server) => {
                self.accept(&server, &payload);
                let marked: usize = invalidates
                    .iter()
                    .map(|t| cache.invalidate(t.group, t.operation))
                    .sum();
                info!(group, operation, invalidated = marked, "mutation applied");
                Ok(server)
            }
            Err(err) => {
                warn!(group, operation, kind = ?err.kind(), "mutation failed; draft kept");
                self.last_error = Some(err.clone());
                self.state = DraftState::Failed;
                Err(err.into())
            }
        }
    }

    fn accept(&mut self, server: &Value, submitted: &Value) {
        self.last_error = None;
        let unedited = self.encode().is_ok_and(|current| current == *submitted);
        match serde_json::from_value::<V>(server.clone()) {
            Ok(saved) => self.baseline = saved,
            // Server echoed something we cannot read back; what we sent is what was saved.
            Err(err) => {
                warn!(%err, "mutation result does not decode; keeping submitted value as baseline");
                if unedited {
                    self.baseline = self.value.clone();
                }
            }
        }
        if unedited {
            self.value = self.baseline.clone();
            self.issues.clear();
            self.state = DraftState::Submitted;
        } else {
            self.revalidate();
        }
    }

    /// Notice for the last error, with per-field title overrides applied.
    pub fn notice(&self) -> Option<Notice> {
        let err = self.last_error.as_ref()?;
        let mut notice = Notice::from_error(err);
        if let CallError::Validation { issues, .. } = err {
            if let Some((_, title)) = issues
                .first()
                .and_then(|issue| self.issue_titles.iter().find(|(f, _)| *f == issue.field))
            {
                notice.title = (*title).to_string();
            }
        }
        Some(notice)
    }

    /// Push the last error's notice onto `toasts`. Returns `false` if there was no error.
    pub fn present_error(&self, toasts: &mut ToastService, now: Instant) -> bool {
        match self.notice() {
            Some(notice) => {
                toasts.push(notice.to_toast(), DEFAULT_TOAST_TTL, now);
                true
            }
            None => false,
        }
    }
}
