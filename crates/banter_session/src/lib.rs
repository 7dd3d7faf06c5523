#![forbid(unsafe_code)]

//! Client-side chat session engine.
//!
//! One spawned task owns the message set, the identity state, the draft,
//! and the outbox; commands go in over a channel, view snapshots and
//! notifications come back out. The task reconciles a one-shot history
//! load with a single live subscription, merging by message id so the
//! two sources can land in any order without losing anything.

pub mod history;
pub mod identity;
pub mod live;
pub mod outbox;
pub mod session;
pub mod store;


pub use history::HistoryLoader;
pub use identity::{IdentityGate, IdentityState};
pub use live::{AlreadyStartedError, LiveFeed, LiveItem, LiveStatus};
pub use outbox::{Outbox, SendId, SendReceipt, SendStatus};
pub use session::{
	ChatView, SessionCommand, SessionConfig, SessionError, SessionEvent, SessionHandle, SessionServices, SessionView,
	spawn_session,
};
pub use store::{MessageStore, SortOrder, UnknownSortOrder};
