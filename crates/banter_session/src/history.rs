#![forbid(unsafe_code)]

use banter_remote::{Message, SharedIdentityService, SharedMessageQuery};
use tracing::{debug, info, warn};

/// One-shot loader for the existing message history.
///
/// Runs when the resolved identity changes, including the initial
/// resolution. Every failure degrades to an empty batch, so merging the
/// result can only ever add messages.
pub struct HistoryLoader {
	identity: SharedIdentityService,
	query: SharedMessageQuery,
}

impl HistoryLoader {
	pub fn new(identity: SharedIdentityService, query: SharedMessageQuery) -> Self {
		Self { identity, query }
	}

	/// Fetch the full history. Re-checks authentication with the
	/// provider rather than trusting cached state.
	pub async fn load(&self) -> Vec<Message> {
		let identity = match self.identity.current_identity().await {
			Ok(identity) => identity,
			Err(e) => {
				debug!(reason = %e, "history load skipped; no signed-in user");
				return Vec::new();
			}
		};

		match self.query.list_messages(&identity.context()).await {
			Ok(messages) => {
				info!(count = messages.len(), "history loaded");
				messages
			}
			Err(e) => {
				warn!(error = %e, "history load failed; keeping whatever is already displayed");
				Vec::new()
			}
		}
	}
}
