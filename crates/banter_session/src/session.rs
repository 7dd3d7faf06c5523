#![forbid(unsafe_code)]

use std::sync::Arc;

use banter_domain::Username;
use banter_remote::{
	AuthContext, EventStreamService, FeedEvent, IdentityService, Message, MessageQueryService,
	MessageSubmissionService, NewMessage, RemoteError, SharedEventStream, SharedIdentityService, SharedMessageQuery,
	SharedMessageSubmission,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::history::HistoryLoader;
use crate::identity::{IdentityGate, IdentityState};
use crate::live::{LiveFeed, LiveItem, LiveStatus};
use crate::outbox::{Outbox, SendId, SendReceipt};
use crate::store::{MessageStore, SortOrder};

/// The remote collaborators a session talks to.
#[derive(Clone)]
pub struct SessionServices {
	pub identity: SharedIdentityService,
	pub query: SharedMessageQuery,
	pub submit: SharedMessageSubmission,
	pub stream: SharedEventStream,
}

impl SessionServices {
	/// Wire every contract to one backend, the usual demo and test shape.
	pub fn from_backend<B>(backend: Arc<B>) -> Self
	where
		B: IdentityService + MessageQueryService + MessageSubmissionService + EventStreamService + 'static,
	{
		Self {
			identity: backend.clone(),
			query: backend.clone(),
			submit: backend.clone(),
			stream: backend,
		}
	}
}

/// Tunables for a session task.
#[derive(Debug, Clone)]
pub struct SessionConfig {
	/// Display order used for view snapshots.
	pub sort_order: SortOrder,

	/// Capacity of the command channel.
	pub command_queue_capacity: usize,
}

impl Default for SessionConfig {
	fn default() -> Self {
		Self {
			sort_order: SortOrder::default(),
			command_queue_capacity: 256,
		}
	}
}

/// Commands accepted by a running session task.
#[derive(Debug)]
pub enum SessionCommand {
	/// Replace the draft text.
	EditDraft {
		text: String,
	},

	/// Submit the current draft.
	SubmitDraft,

	/// Re-submit a failed send.
	RetrySend {
		send_id: SendId,
	},

	/// Re-resolve the identity after something may have changed it.
	RefreshIdentity,

	/// Sign out and drop to the signed-out view.
	SignOut,

	/// Snapshot the current view.
	Snapshot {
		resp: oneshot::Sender<SessionView>,
	},

	/// Stop the session task.
	Shutdown,
}

/// Notifications pushed to the embedder.
#[derive(Debug, Clone)]
pub enum SessionEvent {
	/// Identity resolution finished; `None` means signed out.
	IdentityChanged {
		username: Option<Username>,
	},

	/// A history merge finished; `added` counts newly seen messages.
	HistoryLoaded {
		added: usize,
	},

	/// A live message landed in the store.
	MessageReceived(Message),

	/// The live feed reported dropped events.
	FeedLagged {
		dropped: u64,
	},

	/// The live feed ended and will not resume this session.
	LiveFeedEnded {
		reason: String,
	},

	/// A submission failed; the receipt is retryable.
	SendFailed {
		send_id: SendId,
		reason: String,
	},

	/// A pending send was confirmed by its echo.
	SendConfirmed {
		send_id: SendId,
	},
}

/// Render-agnostic snapshot of a session.
///
/// Message content and the composer exist only in the `Chat` variant, so
/// a signed-out render cannot show either even by accident.
#[derive(Debug, Clone)]
pub enum SessionView {
	/// Identity resolution is still in flight.
	Loading,

	/// No usable session.
	SignedOut,

	Chat(ChatView),
}

impl SessionView {
	pub fn as_chat(&self) -> Option<&ChatView> {
		match self {
			SessionView::Chat(view) => Some(view),
			_ => None,
		}
	}
}

/// Snapshot of an authenticated session.
#[derive(Debug, Clone)]
pub struct ChatView {
	pub username: Username,

	/// Messages in display order, recomputed for this snapshot.
	pub messages: Vec<Message>,

	pub draft: String,

	/// Every submission of this session, oldest first.
	pub outbox: Vec<SendReceipt>,

	pub live: LiveStatus,
}

impl ChatView {
	/// Whether a message in this view was written by the viewer.
	pub fn is_mine(&self, message: &Message) -> bool {
		message.owner == self.username
	}
}

/// Errors surfaced by [`SessionHandle`] calls.
#[derive(Debug, Error)]
pub enum SessionError {
	/// The session task stopped or was never started.
	#[error("session task is not running")]
	NotRunning,
}

/// Cloneable handle to a running session task.
#[derive(Clone)]
pub struct SessionHandle {
	cmd_tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
	pub async fn edit_draft(&self, text: impl Into<String>) -> Result<(), SessionError> {
		self.send(SessionCommand::EditDraft { text: text.into() }).await
	}

	pub async fn submit_draft(&self) -> Result<(), SessionError> {
		self.send(SessionCommand::SubmitDraft).await
	}

	pub async fn retry_send(&self, send_id: SendId) -> Result<(), SessionError> {
		self.send(SessionCommand::RetrySend { send_id }).await
	}

	pub async fn refresh_identity(&self) -> Result<(), SessionError> {
		self.send(SessionCommand::RefreshIdentity).await
	}

	pub async fn sign_out(&self) -> Result<(), SessionError> {
		self.send(SessionCommand::SignOut).await
	}

	pub async fn snapshot(&self) -> Result<SessionView, SessionError> {
		let (tx, rx) = oneshot::channel();
		self.send(SessionCommand::Snapshot { resp: tx }).await?;
		rx.await.map_err(|_| SessionError::NotRunning)
	}

	pub async fn shutdown(&self) -> Result<(), SessionError> {
		self.send(SessionCommand::Shutdown).await
	}

	async fn send(&self, cmd: SessionCommand) -> Result<(), SessionError> {
		self.cmd_tx.send(cmd).await.map_err(|_| SessionError::NotRunning)
	}
}

/// Spawn a session task. Returns the command handle and the receiver the
/// embedder drains for notifications.
pub fn spawn_session(
	services: SessionServices,
	cfg: SessionConfig,
) -> (SessionHandle, mpsc::UnboundedReceiver<SessionEvent>) {
	let (cmd_tx, cmd_rx) = mpsc::channel(cfg.command_queue_capacity);
	let (event_tx, event_rx) = mpsc::unbounded_channel();

	tokio::spawn(run_session_task(services, cfg, cmd_rx, event_tx));

	(SessionHandle { cmd_tx }, event_rx)
}

struct SubmitOutcome {
	send_id: SendId,
	result: Result<Message, RemoteError>,
}

async fn run_session_task(
	services: SessionServices,
	cfg: SessionConfig,
	mut cmd_rx: mpsc::Receiver<SessionCommand>,
	event_tx: mpsc::UnboundedSender<SessionEvent>,
) {
	let mut gate = IdentityGate::new(services.identity.clone());
	let history = HistoryLoader::new(services.identity.clone(), services.query.clone());
	let mut live = LiveFeed::new(services.stream.clone());
	let mut store = MessageStore::new();
	let mut outbox = Outbox::new();
	let mut draft = String::new();

	let (live_tx, mut live_rx) = mpsc::unbounded_channel::<LiveItem>();
	let (submit_tx, mut submit_rx) = mpsc::unbounded_channel::<SubmitOutcome>();

	// Startup: resolve identity, seed the store, open the feed. The feed
	// is started exactly once, with whatever auth this first resolution
	// produced; later identity changes do not restart it.
	let state = gate.resolve().await;
	notify_identity(&event_tx, &state);

	let added = store.merge_history(history.load().await);
	let _ = event_tx.send(SessionEvent::HistoryLoaded { added });

	if let Err(e) = live.start(gate.auth_context().as_ref(), live_tx).await {
		warn!(error = %e, "live feed start refused");
	}

	info!("session started");

	loop {
		tokio::select! {
			cmd = cmd_rx.recv() => {
				let Some(cmd) = cmd else {
					debug!("all session handles dropped; stopping");
					break;
				};

				match cmd {
					SessionCommand::EditDraft { text } => {
						if gate.state().is_authenticated() {
							draft = text;
						} else {
							warn!("draft edit ignored; no signed-in user");
						}
					}

					SessionCommand::SubmitDraft => {
						let Some(identity) = gate.state().identity() else {
							warn!("submit ignored; no signed-in user");
							continue;
						};

						if draft.trim().is_empty() {
							debug!("submit ignored; draft is empty");
							continue;
						}

						// Optimistic: the draft resets now and is not
						// restored on failure.
						let text = std::mem::take(&mut draft);
						let send_id = outbox.begin(text.clone());
						debug!(send_id = %send_id, "submitting draft");

						spawn_submission(
							services.submit.clone(),
							identity.context(),
							identity.username.clone(),
							text,
							send_id,
							submit_tx.clone(),
						);
					}

					SessionCommand::RetrySend { send_id } => {
						let Some(identity) = gate.state().identity() else {
							warn!(send_id = %send_id, "retry ignored; no signed-in user");
							continue;
						};

						match outbox.begin_retry(send_id) {
							Some(text) => {
								info!(send_id = %send_id, "retrying failed send");
								spawn_submission(
									services.submit.clone(),
									identity.context(),
									identity.username.clone(),
									text,
									send_id,
									submit_tx.clone(),
								);
							}
							None => warn!(send_id = %send_id, "retry ignored; send is not in a failed state"),
						}
					}

					SessionCommand::RefreshIdentity => {
						let state = gate.resolve().await;
						notify_identity(&event_tx, &state);

						let added = store.merge_history(history.load().await);
						let _ = event_tx.send(SessionEvent::HistoryLoaded { added });
					}

					SessionCommand::SignOut => {
						let state = gate.sign_out().await;
						notify_identity(&event_tx, &state);
						draft.clear();

						let added = store.merge_history(history.load().await);
						let _ = event_tx.send(SessionEvent::HistoryLoaded { added });
					}

					SessionCommand::Snapshot { resp } => {
						let _ = resp.send(current_view(&gate, &store, &outbox, &draft, &live, cfg.sort_order));
					}

					SessionCommand::Shutdown => {
						debug!("session shutdown requested");
						break;
					}
				}
			}

			item = live_rx.recv(), if live.status() == LiveStatus::Streaming => {
				match item {
					Some(LiveItem::Event(FeedEvent::MessageCreated(msg))) => {
						if let Some(identity) = gate.state().identity()
							&& msg.owner == identity.username
							&& let Some(send_id) = outbox.confirm_echo(&msg.text)
						{
							debug!(send_id = %send_id, "send confirmed by echo");
							let _ = event_tx.send(SessionEvent::SendConfirmed { send_id });
						}

						if store.merge(msg.clone()) {
							let _ = event_tx.send(SessionEvent::MessageReceived(msg));
						}
					}

					Some(LiveItem::Event(FeedEvent::Lagged { dropped })) => {
						warn!(dropped, "live feed lagged; events were dropped upstream");
						let _ = event_tx.send(SessionEvent::FeedLagged { dropped });
					}

					Some(LiveItem::Ended { reason }) => {
						warn!(reason = %reason, "live feed ended; no reconnect within this session");
						live.mark_ended();
						let _ = event_tx.send(SessionEvent::LiveFeedEnded { reason });
					}

					None => {
						live.mark_ended();
						let _ = event_tx.send(SessionEvent::LiveFeedEnded {
							reason: "live feed task stopped".to_string(),
						});
					}
				}
			}

			outcome = submit_rx.recv() => {
				let Some(SubmitOutcome { send_id, result }) = outcome else {
					continue;
				};

				match result {
					Ok(ack) => {
						// Ack only: the authoritative copy arrives on the
						// live feed, which is also what confirms the send.
						debug!(send_id = %send_id, id = %ack.id, "submission acknowledged");
					}
					Err(e) => {
						metrics::counter!("banter_sends_failed_total").increment(1);
						warn!(send_id = %send_id, error = %e, "submission failed");
						if outbox.mark_failed(send_id, e.to_string()) {
							let _ = event_tx.send(SessionEvent::SendFailed {
								send_id,
								reason: e.to_string(),
							});
						}
					}
				}
			}
		}
	}

	live.shutdown();
	info!("session stopped");
}

fn spawn_submission(
	submit: SharedMessageSubmission,
	auth: AuthContext,
	owner: Username,
	text: String,
	send_id: SendId,
	submit_tx: mpsc::UnboundedSender<SubmitOutcome>,
) {
	tokio::spawn(async move {
		let result = submit.create_message(&auth, NewMessage { text, owner }).await;
		let _ = submit_tx.send(SubmitOutcome { send_id, result });
	});
}

fn notify_identity(event_tx: &mpsc::UnboundedSender<SessionEvent>, state: &IdentityState) {
	let username = state.identity().map(|identity| identity.username.clone());
	let _ = event_tx.send(SessionEvent::IdentityChanged { username });
}

fn current_view(
	gate: &IdentityGate,
	store: &MessageStore,
	outbox: &Outbox,
	draft: &str,
	live: &LiveFeed,
	sort_order: SortOrder,
) -> SessionView {
	match gate.state() {
		IdentityState::Resolving => SessionView::Loading,
		IdentityState::Unauthenticated => SessionView::SignedOut,
		IdentityState::Authenticated(identity) => SessionView::Chat(ChatView {
			username: identity.username.clone(),
			messages: store.ordered_view(sort_order),
			draft: draft.to_string(),
			outbox: outbox.entries().to_vec(),
			live: live.status(),
		}),
	}
}
