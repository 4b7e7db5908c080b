// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Transport doubles.
//!
//! [`ScriptedTransport`] answers from per-operation scripts and can hold
//! calls at a gate until the test releases them, which is how cache tests
//! pin a fetch in flight across an invalidation. [`CountingTransport`]
//! wraps a real transport and counts what passes through.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use quill_registry_api::{CallError, CallRequest, Transport};
use serde_json::Value;
use tokio::sync::Semaphore;

type Responder = Arc<dyn Fn(&CallRequest) -> Result<Value, CallError> + Send + Sync>;
type Key = (String, String);

fn key(group: &str, operation: &str) -> Key {
    (group.to_string(), operation.to_string())
}

#[derive(Default)]
struct Script {
    once: VecDeque<Result<Value, CallError>>,
    always: Option<Responder>,
}

#[derive(Default)]
struct Inner {
    scripts: HashMap<Key, Script>,
    calls: Vec<CallRequest>,
    delay: Option<Duration>,
    gate: Option<Arc<Semaphore>>,
}

/// Transport answering from scripts.
///
/// Resolution order for a call: the next queued one-shot response, then the
/// standing responder, then `CallError::NotFound`. The response is computed
/// when the call is made; the gate and delay only postpone its delivery.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    inner: Arc<Mutex<Inner>>,
}

impl ScriptedTransport {
    /// Transport with no scripts.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Always answer `group.operation` with `value`.
    pub fn respond(&self, group: &str, operation: &str, value: Value) -> &Self {
        self.respond_with(group, operation, move |_| Ok(value.clone()))
    }

    /// Always fail `group.operation` with `error`.
    pub fn fail(&self, group: &str, operation: &str, error: CallError) -> &Self {
        self.respond_with(group, operation, move |_| Err(error.clone()))
    }

    /// Answer `group.operation` by running `responder` on each request.
    pub fn respond_with<F>(&self, group: &str, operation: &str, responder: F) -> &Self
    where
        F: Fn(&CallRequest) -> Result<Value, CallError> + Send + Sync + 'static,
    {
        self.lock()
            .scripts
            .entry(key(group, operation))
            .or_default()
            .always = Some(Arc::new(responder));
        self
    }

    /// Queue a one-shot response, used before the standing responder.
    pub fn respond_once(
        &self,
        group: &str,
        operation: &str,
        result: Result<Value, CallError>,
    ) -> &Self {
        self.lock()
            .scripts
            .entry(key(group, operation))
            .or_default()
            .once
            .push_back(result);
        self
    }

    /// Delay every response by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        self.lock().delay = Some(delay);
    }

    /// Hold every call made from now on until [`ScriptedTransport::release`].
    pub fn hold(&self) {
        self.lock().gate = Some(Arc::new(Semaphore::new(0)));
    }

    /// Let `n` held calls proceed.
    pub fn release(&self, n: usize) {
        let gate = self.lock().gate.clone();
        if let Some(gate) = gate {
            gate.add_permits(n);
        }
    }

    /// Stop holding; calls already waiting are released.
    pub fn open(&self) {
        let gate = self.lock().gate.take();
        if let Some(gate) = gate {
            gate.close();
        }
    }

    /// Every request received, in order.
    pub fn calls(&self) -> Vec<CallRequest> {
        self.lock().calls.clone()
    }

    /// Requests received for `group.operation`.
    pub fn call_count(&self, group: &str, operation: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.group == group && c.operation == operation)
            .count()
    }

    /// Requests received in total.
    pub fn total_calls(&self) -> usize {
        self.lock().calls.len()
    }

    fn answer(inner: &mut Inner, request: &CallRequest) -> Result<Value, CallError> {
        let script = inner
            .scripts
            .get_mut(&key(&request.group, &request.operation));
        match script {
            Some(script) => match script.once.pop_front() {
                Some(result) => result,
                None => match &script.always {
                    Some(responder) => responder(request),
                    None => Err(not_found(request)),
                },
            },
            None => Err(not_found(request)),
        }
    }
}

fn not_found(request: &CallRequest) -> CallError {
    CallError::NotFound {
        group: request.group.clone(),
        operation: request.operation.clone(),
    }
}

impl Transport for ScriptedTransport {
    fn call(&self, request: CallRequest) -> BoxFuture<'static, Result<Value, CallError>> {
        let (result, delay, gate) = {
            let mut inner = self.lock();
            inner.calls.push(request.clone());
            // Responder runs under the lock; responders must not call back in.
            let result = Self::answer(&mut inner, &request);
            (result, inner.delay, inner.gate.clone())
        };
        async move {
            if let Some(gate) = gate {
                // A closed gate means `open()` was called: proceed.
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
            }
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            result
        }
        .boxed()
    }
}

/// Wraps a transport and counts calls per `(group, operation)`.
#[derive(Clone)]
pub struct CountingTransport<T> {
    inner: T,
    counts: Arc<Mutex<HashMap<Key, usize>>>,
}

impl<T: Transport> CountingTransport<T> {
    /// Wrap `inner`.
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            counts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Calls made to `group.operation`.
    pub fn count(&self, group: &str, operation: &str) -> usize {
        self.counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key(group, operation))
            .copied()
            .unwrap_or(0)
    }

    /// Calls made in total.
    pub fn total(&self) -> usize {
        self.counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .sum()
    }
}

impl<T: Transport> Transport for CountingTransport<T> {
    fn call(&self, request: CallRequest) -> BoxFuture<'static, Result<Value, CallError>> {
        *self
            .counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key(&request.group, &request.operation))
            .or_default() += 1;
        self.inner.call(request)
    }
}
