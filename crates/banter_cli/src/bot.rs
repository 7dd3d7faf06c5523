#![forbid(unsafe_code)]

use std::time::Duration;

use banter_remote::memory::MemoryChat;
use banter_remote::{Identity, MessageSubmissionService as _, NewMessage, RemoteError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Canned lines the backend is seeded with before the session starts.
pub const OPENING_LINES: &[&str] = &[
	"welcome to banter",
	"everything above this line is seeded history",
	"everything below it arrives live",
];

const CHATTER: &[&str] = &[
	"anyone around?",
	"the coffee machine is fixed",
	"shipping it",
	"that deploy went suspiciously smoothly",
	"lunch?",
	"reading the backlog, give me a minute",
];

/// Companion bot posting canned chatter through the regular write path,
/// so the live feed has traffic without a second human.
pub struct ChatterBot {
	identity: Identity,
	interval: Duration,
}

impl ChatterBot {
	/// The bot reuses an identity signed in by the caller; it never touches
	/// the ambient current-user slot.
	pub fn new(identity: Identity, interval: Duration) -> Self {
		Self { identity, interval }
	}

	pub fn spawn(self, backend: MemoryChat) -> JoinHandle<()> {
		tokio::spawn(self.run(backend))
	}

	async fn run(self, backend: MemoryChat) {
		let auth = self.identity.context();
		let bot = self.identity.username.clone();

		let mut interval = tokio::time::interval(self.interval);
		interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

		info!(%bot, interval_ms = self.interval.as_millis(), "chatter bot started");

		let mut tick: usize = 0;
		loop {
			interval.tick().await;

			let text = CHATTER[tick % CHATTER.len()].to_string();
			tick += 1;

			let new = NewMessage {
				text,
				owner: bot.clone(),
			};

			match backend.create_message(&auth, new).await {
				Ok(msg) => debug!(%bot, id = %msg.id, "chatter bot posted"),
				Err(RemoteError::NotSignedIn | RemoteError::SessionExpired) => {
					warn!(%bot, "chatter bot session is gone; stopping");
					break;
				}
				Err(e) => warn!(%bot, error = %e, "chatter bot post failed"),
			}
		}
	}
}
