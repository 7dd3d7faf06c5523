#![forbid(unsafe_code)]

use banter_remote::{AuthContext, FeedEvent, MessageFeed, SharedEventStream};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Returned when a second live feed start is attempted within one session.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("live feed already started for this session")]
pub struct AlreadyStartedError;

/// Lifecycle of the session's live subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LiveStatus {
	/// Not started yet.
	#[default]
	Idle,

	/// Subscribed; events are flowing into the session.
	Streaming,

	/// The subscription could not be opened, or the stream closed. It
	/// does not come back within this session.
	Ended,
}

/// Items the forwarding task pushes into the session loop.
#[derive(Debug)]
pub enum LiveItem {
	Event(FeedEvent),

	/// The stream closed and will not resume.
	Ended {
		reason: String,
	},
}

/// Owns the single live subscription of a session.
///
/// A session subscribes at most once, at startup, with whatever auth
/// context the initial identity resolution produced. Later identity
/// changes do not restart it, and neither do stream errors.
pub struct LiveFeed {
	stream: SharedEventStream,
	started: bool,
	status: LiveStatus,
	task: Option<tokio::task::JoinHandle<()>>,
}

impl LiveFeed {
	pub fn new(stream: SharedEventStream) -> Self {
		Self {
			stream,
			started: false,
			status: LiveStatus::Idle,
			task: None,
		}
	}

	pub fn status(&self) -> LiveStatus {
		self.status
	}

	/// Open the subscription and spawn the forwarding task. At most one
	/// start per session; a second call is refused so a re-entrant
	/// startup can never double-deliver events.
	///
	/// Subscription failures are not errors: the session keeps running
	/// on history alone, with the feed marked [`LiveStatus::Ended`].
	pub async fn start(
		&mut self,
		auth: Option<&AuthContext>,
		live_tx: mpsc::UnboundedSender<LiveItem>,
	) -> Result<(), AlreadyStartedError> {
		if self.started {
			return Err(AlreadyStartedError);
		}
		self.started = true;

		let Some(auth) = auth else {
			debug!("live feed not started; no signed-in user");
			self.status = LiveStatus::Ended;
			return Ok(());
		};

		match self.stream.subscribe_message_created(auth).await {
			Ok(feed) => {
				self.task = Some(spawn_forward_loop(feed, live_tx));
				self.status = LiveStatus::Streaming;
				debug!("live feed streaming");
				Ok(())
			}
			Err(e) => {
				warn!(error = %e, "live feed subscribe failed; continuing without live updates");
				self.status = LiveStatus::Ended;
				Ok(())
			}
		}
	}

	/// Record that the stream is gone. Called by the session when the
	/// forwarding task reports the end.
	pub fn mark_ended(&mut self) {
		self.status = LiveStatus::Ended;
	}

	/// Abort the forwarding task. The only teardown path for the
	/// subscription.
	pub fn shutdown(&mut self) {
		if let Some(task) = self.task.take() {
			task.abort();
		}
	}
}

fn spawn_forward_loop(mut feed: MessageFeed, live_tx: mpsc::UnboundedSender<LiveItem>) -> tokio::task::JoinHandle<()> {
	tokio::spawn(async move {
		while let Some(event) = feed.recv().await {
			if live_tx.send(LiveItem::Event(event)).is_err() {
				debug!("session dropped the live receiver; stopping forward loop");
				return;
			}
		}

		let _ = live_tx.send(LiveItem::Ended {
			reason: "stream closed by the backend".to_string(),
		});
	})
}
