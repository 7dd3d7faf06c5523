#![forbid(unsafe_code)]

pub mod memory;

use std::fmt;
use std::sync::Arc;

use banter_domain::{MessageId, Timestamp, Username};
use thiserror::Error;
use tokio::sync::mpsc;

/// The authenticated principal for the current session.
#[derive(Debug, Clone)]
pub struct Identity {
	pub username: Username,
	pub token: SessionToken,
}

impl Identity {
	/// Auth material passed explicitly to every remote call.
	pub fn context(&self) -> AuthContext {
		AuthContext {
			username: self.username.clone(),
			token: self.token.clone(),
		}
	}
}

/// Per-call authentication material derived from a resolved [`Identity`].
#[derive(Debug, Clone)]
pub struct AuthContext {
	pub username: Username,
	pub token: SessionToken,
}

/// Bearer token wrapper that redacts in logs.
#[derive(Clone)]
pub struct SessionToken(String);

impl SessionToken {
	pub fn new(s: impl Into<String>) -> Self {
		Self(s.into())
	}

	/// Access the inner token.
	pub fn expose(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for SessionToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SessionToken(<redacted>)")
	}
}

impl fmt::Display for SessionToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("<redacted>")
	}
}

/// A chat message as stored by the backend. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
	pub id: MessageId,

	pub text: String,

	pub owner: Username,

	/// Backend-assigned creation instant; the display ordering key.
	pub created_at: Timestamp,
}

/// Client-built payload for a message that does not exist yet. The id and
/// creation instant are assigned by the backend on accept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
	pub text: String,
	pub owner: Username,
}

/// Errors surfaced by the remote services.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
	/// No signed-in session.
	#[error("not signed in")]
	NotSignedIn,

	/// A session exists but its token is no longer valid.
	#[error("session expired")]
	SessionExpired,

	/// The service could not be reached or refused to answer.
	#[error("service unavailable: {0}")]
	Unavailable(String),

	/// The service understood the request and said no.
	#[error("rejected: {0}")]
	Rejected(String),
}

/// Items emitted on a message feed.
#[derive(Debug, Clone)]
pub enum FeedEvent {
	/// A message was created on the backend.
	MessageCreated(Message),

	/// Indicates the subscriber is lagging and events were dropped.
	Lagged {
		dropped: u64,
	},
}

/// Subscriber half of the message-created stream. Lazy and infinite:
/// events arrive until the feed is dropped or the backend closes it, and
/// a closed feed never resumes.
#[derive(Debug)]
pub struct MessageFeed {
	rx: mpsc::Receiver<FeedEvent>,
}

impl MessageFeed {
	pub fn new(rx: mpsc::Receiver<FeedEvent>) -> Self {
		Self { rx }
	}

	/// Receive the next feed event. `None` means the stream ended for good.
	pub async fn recv(&mut self) -> Option<FeedEvent> {
		self.rx.recv().await
	}
}

/// Build a bounded feed channel pair.
pub fn feed_channel(capacity: usize) -> (mpsc::Sender<FeedEvent>, MessageFeed) {
	let (tx, rx) = mpsc::channel(capacity);
	(tx, MessageFeed::new(rx))
}

/// Identity provider: who, if anyone, is signed in right now.
#[async_trait::async_trait]
pub trait IdentityService: Send + Sync {
	/// Resolve the current identity. Any error means "no usable session",
	/// whether missing, expired, or the provider was unreachable.
	async fn current_identity(&self) -> Result<Identity, RemoteError>;

	/// Best-effort sign-out; failures are not reported.
	async fn sign_out(&self);
}

/// One-shot query for the full message history.
#[async_trait::async_trait]
pub trait MessageQueryService: Send + Sync {
	async fn list_messages(&self, auth: &AuthContext) -> Result<Vec<Message>, RemoteError>;
}

/// Write path for new messages.
#[async_trait::async_trait]
pub trait MessageSubmissionService: Send + Sync {
	/// Create a message. The returned record carries the assigned id and
	/// timestamp, but callers treat it as an ack: the authoritative copy
	/// arrives on the live feed.
	async fn create_message(&self, auth: &AuthContext, new: NewMessage) -> Result<Message, RemoteError>;
}

/// Push channel of newly created messages.
#[async_trait::async_trait]
pub trait EventStreamService: Send + Sync {
	/// Open a live feed of message-created events. Every call opens a
	/// fresh subscription that delivers independently of any other.
	async fn subscribe_message_created(&self, auth: &AuthContext) -> Result<MessageFeed, RemoteError>;
}

/// Shared service handles as wired by embedders.
pub type SharedIdentityService = Arc<dyn IdentityService>;
pub type SharedMessageQuery = Arc<dyn MessageQueryService>;
pub type SharedMessageSubmission = Arc<dyn MessageSubmissionService>;
pub type SharedEventStream = Arc<dyn EventStreamService>;

/// Validate basic submission invariants.
pub fn validate_new_message(new: &NewMessage) -> Result<(), RemoteError> {
	if new.text.trim().is_empty() {
		return Err(RemoteError::Rejected("message text must be non-empty".to_string()));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn session_tokens_redact_in_logs() {
		let token = SessionToken::new("super-secret");
		assert_eq!(format!("{token:?}"), "SessionToken(<redacted>)");
		assert_eq!(token.to_string(), "<redacted>");
		assert_eq!(token.expose(), "super-secret");
	}

	#[test]
	fn rejects_blank_message_text() {
		let new = NewMessage {
			text: "   ".to_string(),
			owner: Username::new("julia").unwrap(),
		};
		assert!(validate_new_message(&new).is_err());
	}
}
