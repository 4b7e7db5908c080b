// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Toast queue with TTL, dedupe and optional action buttons.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Default time a toast stays visible.
pub const DEFAULT_TOAST_TTL: Duration = Duration::from_secs(5);

/// Toast severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastKind {
    /// Informational note.
    Info,
    /// An operation completed.
    Success,
    /// Warning that may need attention.
    Warn,
    /// Error requiring user awareness.
    Error,
}

/// Identifier for a toast entry.
pub type ToastId = u64;

/// What to show; built by callers and handed to [`ToastService::push`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToastMessage {
    /// Severity.
    pub kind: ToastKind,
    /// Short title line.
    pub title: String,
    /// Optional body text.
    pub body: Option<String>,
    /// Optional action button label (for example "Try again").
    pub action: Option<String>,
}

impl ToastMessage {
    /// Message with a title and no body.
    pub fn new(kind: ToastKind, title: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            body: None,
            action: None,
        }
    }

    /// Attach body text.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Attach an action button label.
    pub fn with_action(mut self, label: impl Into<String>) -> Self {
        self.action = Some(label.into());
        self
    }
}

#[derive(Debug, Clone)]
struct Toast {
    id: ToastId,
    message: ToastMessage,
    ttl: Duration,
    created: Instant,
}

/// Rendering-friendly view of a toast.
#[derive(Debug, Clone, PartialEq)]
pub struct ToastRender {
    /// Stable identifier.
    pub id: ToastId,
    /// What was pushed.
    pub message: ToastMessage,
    /// 1.0 -> just created, 0.0 -> expired.
    pub progress: f32,
}

/// In-memory toast queue.
///
/// Pushing a message identical to one pushed within the dedupe window
/// refreshes the existing toast instead of stacking a copy.
#[derive(Debug)]
pub struct ToastService {
    queue: VecDeque<Toast>,
    max: usize,
    dedupe_window: Duration,
    next_id: ToastId,
}

impl Default for ToastService {
    fn default() -> Self {
        Self::new(5)
    }
}

impl ToastService {
    /// Create a queue holding at most `max` toasts; the oldest is evicted first.
    pub fn new(max: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            max: max.max(1),
            dedupe_window: Duration::from_millis(500),
            next_id: 1,
        }
    }

    /// Push a message, returning its id.
    pub fn push(&mut self, message: ToastMessage, ttl: Duration, now: Instant) -> ToastId {
        let window = self.dedupe_window;
        if let Some(existing) = self
            .queue
            .iter_mut()
            .find(|t| t.message == message && now.saturating_duration_since(t.created) <= window)
        {
            existing.created = now;
            existing.ttl = ttl;
            return existing.id;
        }

        let id = self.next_id;
        self.next_id += 1;
        if self.queue.len() == self.max {
            self.queue.pop_front();
        }
        self.queue.push_back(Toast {
            id,
            message,
            ttl,
            created: now,
        });
        id
    }

    /// Remove a toast (close button or action clicked). Returns `false` if it was gone.
    pub fn dismiss(&mut self, id: ToastId) -> bool {
        let before = self.queue.len();
        self.queue.retain(|t| t.id != id);
        self.queue.len() != before
    }

    /// Drop expired toasts.
    pub fn retain_visible(&mut self, now: Instant) {
        self.queue
            .retain(|t| now.saturating_duration_since(t.created) < t.ttl);
    }

    /// Render-ready toasts, oldest first.
    pub fn visible(&self, now: Instant) -> Vec<ToastRender> {
        self.queue
            .iter()
            .filter(|t| now.saturating_duration_since(t.created) < t.ttl)
            .map(|t| ToastRender {
                id: t.id,
                message: t.message.clone(),
                progress: 1.0
                    - (now.saturating_duration_since(t.created).as_secs_f32()
                        / t.ttl.as_secs_f32()),
            })
            .collect()
    }

    /// Most recent toast still queued, expired or not.
    pub fn latest(&self) -> Option<&ToastMessage> {
        self.queue.back().map(|t| &t.message)
    }

    /// Number of queued toasts.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns `true` if no toast is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
