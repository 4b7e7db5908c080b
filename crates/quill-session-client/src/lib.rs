// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Client side of the Quill API: the query/mutation cache, drafts bound to
//! mutations, the settings form and dashboard views, and a Unix-socket
//! transport to the session hub.

pub mod cache;
pub mod draft;
pub mod forms;
pub mod socket;
pub mod views;

pub use cache::{CacheKey, EntrySnapshot, Observer, QueryCache};
pub use draft::{
    Draft, DraftState, DomainRule, InvalidationTarget, MutationBinding, Notice, SubmitError,
};
pub use forms::{SocialAuthForm, UPDATE_SOCIAL_AUTH};
pub use socket::SocketTransport;
pub use views::{login_providers, total_revenue, LoginProvider, RevenueCard};
