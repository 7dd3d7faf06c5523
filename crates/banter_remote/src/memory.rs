#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use banter_domain::{MessageId, Timestamp, Username};
use chrono::{SecondsFormat, Utc};
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
	AuthContext, EventStreamService, FeedEvent, Identity, IdentityService, Message, MessageFeed, MessageQueryService,
	MessageSubmissionService, NewMessage, RemoteError, SessionToken, feed_channel, validate_new_message,
};

/// In-process backend that stands in for the identity provider, the
/// message API, and the event stream at once. Used by the demo binary
/// and by end-to-end tests.
#[derive(Debug, Clone)]
pub struct MemoryChat {
	inner: Arc<Mutex<Inner>>,
	cfg: MemoryChatConfig,
}

/// Configuration for [`MemoryChat`].
#[derive(Debug, Clone)]
pub struct MemoryChatConfig {
	/// Maximum number of queued feed events per subscriber.
	pub subscriber_queue_capacity: usize,

	/// How long issued session tokens stay valid.
	pub session_ttl: Duration,
}

impl Default for MemoryChatConfig {
	fn default() -> Self {
		Self {
			subscriber_queue_capacity: 256,
			session_ttl: Duration::from_secs(60 * 60),
		}
	}
}

impl MemoryChat {
	pub fn new(cfg: MemoryChatConfig) -> Self {
		Self {
			inner: Arc::new(Mutex::new(Inner::default())),
			cfg,
		}
	}

	/// Sign a user in and make that session the one
	/// [`IdentityService::current_identity`] answers with.
	pub async fn sign_in(&self, username: Username) -> Identity {
		let token = Uuid::new_v4().to_string();

		let mut inner = self.inner.lock().await;
		inner.sessions.insert(
			token.clone(),
			SessionRecord {
				username: username.clone(),
				expires_at: Instant::now() + self.cfg.session_ttl,
			},
		);
		inner.current = Some(token.clone());

		info!(user = %username, "memory backend: signed in");

		Identity {
			username,
			token: SessionToken::new(token),
		}
	}

	/// Insert a message directly into the log without notifying feed
	/// subscribers. Stands in for history that predates the session.
	pub async fn seed_message(&self, owner: Username, text: impl Into<String>, created_at: Timestamp) -> Message {
		let msg = Message {
			id: MessageId::new_v4(),
			text: text.into(),
			owner,
			created_at,
		};

		let mut inner = self.inner.lock().await;
		inner.log.push(msg.clone());
		msg
	}

	/// Refuse `list_messages` calls while set.
	pub async fn set_query_outage(&self, refuse: bool) {
		self.inner.lock().await.outages.queries = refuse;
	}

	/// Refuse `create_message` calls while set.
	pub async fn set_submission_outage(&self, refuse: bool) {
		self.inner.lock().await.outages.submissions = refuse;
	}

	/// Refuse `subscribe_message_created` calls while set.
	pub async fn set_subscribe_outage(&self, refuse: bool) {
		self.inner.lock().await.outages.subscribes = refuse;
	}

	/// Count of feed subscribers that are still connected.
	pub async fn subscriber_count(&self) -> usize {
		let mut inner = self.inner.lock().await;
		let inner = &mut *inner;
		prune_closed_subscribers(inner);
		inner.subscribers.len()
	}

	async fn broadcast(&self, event: FeedEvent) {
		let mut inner = self.inner.lock().await;
		let inner = &mut *inner;

		prune_closed_subscribers(inner);

		let mut dropped_total: u64 = 0;

		for (idx, sub) in inner.subscribers.iter_mut().enumerate() {
			match sub.try_send(event.clone()) {
				Ok(()) => {
					if let Some(pending) = inner.pending_lag_by_subscriber.get_mut(idx)
						&& *pending > 0 && sub.try_send(FeedEvent::Lagged { dropped: *pending }).is_ok()
					{
						*pending = 0;
					}
				}
				Err(mpsc::error::TrySendError::Full(_)) => {
					dropped_total += 1;

					if let Some(pending) = inner.pending_lag_by_subscriber.get_mut(idx) {
						*pending = pending.saturating_add(1);
					}
				}
				Err(mpsc::error::TrySendError::Closed(_)) => {}
			}
		}

		prune_closed_subscribers(inner);

		if dropped_total > 0 {
			metrics::counter!("banter_feed_lagged_total").increment(dropped_total);
			debug!(dropped = dropped_total, "memory backend: dropped feed events for slow subscribers");
		}
	}
}

#[async_trait::async_trait]
impl IdentityService for MemoryChat {
	async fn current_identity(&self) -> Result<Identity, RemoteError> {
		let mut inner = self.inner.lock().await;

		let Some(token) = inner.current.clone() else {
			return Err(RemoteError::NotSignedIn);
		};

		let username = validate_token(&mut inner, &token)?;
		Ok(Identity {
			username,
			token: SessionToken::new(token),
		})
	}

	async fn sign_out(&self) {
		let mut inner = self.inner.lock().await;
		if let Some(token) = inner.current.take() {
			inner.sessions.remove(&token);
			info!("memory backend: signed out");
		}
	}
}

#[async_trait::async_trait]
impl MessageQueryService for MemoryChat {
	async fn list_messages(&self, auth: &AuthContext) -> Result<Vec<Message>, RemoteError> {
		let mut inner = self.inner.lock().await;
		validate_auth(&mut inner, auth)?;

		if inner.outages.queries {
			return Err(RemoteError::Unavailable("query service is down".to_string()));
		}

		Ok(inner.log.clone())
	}
}

#[async_trait::async_trait]
impl MessageSubmissionService for MemoryChat {
	async fn create_message(&self, auth: &AuthContext, new: NewMessage) -> Result<Message, RemoteError> {
		validate_new_message(&new)?;

		// Assign id and timestamp under the lock, broadcast after
		// releasing it.
		let msg = {
			let mut inner = self.inner.lock().await;
			let username = validate_auth(&mut inner, auth)?;

			if inner.outages.submissions {
				return Err(RemoteError::Unavailable("submission service is down".to_string()));
			}

			if new.owner != username {
				return Err(RemoteError::Rejected("owner does not match the signed-in user".to_string()));
			}

			let msg = Message {
				id: MessageId::new_v4(),
				text: new.text,
				owner: new.owner,
				created_at: now_timestamp()?,
			};
			inner.log.push(msg.clone());
			msg
		};

		debug!(id = %msg.id, owner = %msg.owner, "memory backend: message created");
		self.broadcast(FeedEvent::MessageCreated(msg.clone())).await;

		Ok(msg)
	}
}

#[async_trait::async_trait]
impl EventStreamService for MemoryChat {
	async fn subscribe_message_created(&self, auth: &AuthContext) -> Result<MessageFeed, RemoteError> {
		let mut inner = self.inner.lock().await;
		validate_auth(&mut inner, auth)?;

		if inner.outages.subscribes {
			return Err(RemoteError::Unavailable("event stream is down".to_string()));
		}

		let (tx, feed) = feed_channel(self.cfg.subscriber_queue_capacity);
		inner.subscribers.push(tx);
		inner.pending_lag_by_subscriber.push(0);

		debug!(subs = inner.subscribers.len(), "memory backend: feed subscribed");

		Ok(feed)
	}
}

#[derive(Debug, Default)]
struct Inner {
	sessions: HashMap<String, SessionRecord>,

	/// Token of the session `current_identity` answers with.
	current: Option<String>,

	log: Vec<Message>,

	subscribers: Vec<mpsc::Sender<FeedEvent>>,

	/// Pending lag markers per subscriber.
	pending_lag_by_subscriber: Vec<u64>,

	outages: Outages,
}

#[derive(Debug)]
struct SessionRecord {
	username: Username,
	expires_at: Instant,
}

/// Failure-injection switches for tests.
#[derive(Debug, Default, Clone, Copy)]
struct Outages {
	queries: bool,
	submissions: bool,
	subscribes: bool,
}

fn validate_token(inner: &mut Inner, token: &str) -> Result<Username, RemoteError> {
	let Some(session) = inner.sessions.get(token) else {
		return Err(RemoteError::NotSignedIn);
	};

	if Instant::now() >= session.expires_at {
		inner.sessions.remove(token);
		if inner.current.as_deref() == Some(token) {
			inner.current = None;
		}
		return Err(RemoteError::SessionExpired);
	}

	Ok(session.username.clone())
}

fn validate_auth(inner: &mut Inner, auth: &AuthContext) -> Result<Username, RemoteError> {
	let username = validate_token(inner, auth.token.expose())?;

	// A valid token presented with someone else's name is no session.
	if username != auth.username {
		return Err(RemoteError::NotSignedIn);
	}

	Ok(username)
}

fn now_timestamp() -> Result<Timestamp, RemoteError> {
	let raw = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
	Timestamp::new(raw).map_err(|e| RemoteError::Unavailable(format!("clock produced invalid timestamp: {e}")))
}

fn prune_closed_subscribers(inner: &mut Inner) {
	if inner.subscribers.len() != inner.pending_lag_by_subscriber.len() {
		inner.pending_lag_by_subscriber.resize(inner.subscribers.len(), 0);
	}

	let mut new_subs = Vec::with_capacity(inner.subscribers.len());
	let mut new_lag = Vec::with_capacity(inner.subscribers.len());

	for (idx, s) in inner.subscribers.drain(..).enumerate() {
		if !s.is_closed() {
			new_subs.push(s);
			new_lag.push(*inner.pending_lag_by_subscriber.get(idx).unwrap_or(&0));
		}
	}

	inner.subscribers = new_subs;
	inner.pending_lag_by_subscriber = new_lag;
}
