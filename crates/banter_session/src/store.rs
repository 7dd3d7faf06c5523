#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::str::FromStr;

use banter_domain::MessageId;
use banter_remote::Message;
use thiserror::Error;
use tracing::debug;

/// Display order for [`MessageStore::ordered_view`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
	/// Most recent message first.
	#[default]
	NewestFirst,

	/// Oldest message first.
	OldestFirst,
}

impl SortOrder {
	/// Stable string identifier.
	pub const fn as_str(self) -> &'static str {
		match self {
			SortOrder::NewestFirst => "newest_first",
			SortOrder::OldestFirst => "oldest_first",
		}
	}
}

/// Error for parsing a [`SortOrder`] from a string.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown sort order: {0}")]
pub struct UnknownSortOrder(pub String);

impl FromStr for SortOrder {
	type Err = UnknownSortOrder;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"newest_first" | "newest" | "descending" | "desc" => Ok(SortOrder::NewestFirst),
			"oldest_first" | "oldest" | "ascending" | "asc" => Ok(SortOrder::OldestFirst),
			other => Err(UnknownSortOrder(other.to_string())),
		}
	}
}

/// Authoritative in-memory message set for one session.
///
/// Messages are keyed by id and kept in arrival order; the set only ever
/// grows. Display order is not stored anywhere, [`Self::ordered_view`]
/// recomputes it per snapshot, so a history batch landing after live
/// appends merges instead of clobbering them.
#[derive(Debug, Default)]
pub struct MessageStore {
	messages: Vec<Message>,
	index: HashMap<MessageId, usize>,
}

impl MessageStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.messages.len()
	}

	pub fn is_empty(&self) -> bool {
		self.messages.is_empty()
	}

	pub fn contains(&self, id: MessageId) -> bool {
		self.index.contains_key(&id)
	}

	pub fn get(&self, id: MessageId) -> Option<&Message> {
		self.index.get(&id).map(|&slot| &self.messages[slot])
	}

	/// Insert a message unless its id is already present. Returns true
	/// when the message was new.
	pub fn merge(&mut self, message: Message) -> bool {
		if self.index.contains_key(&message.id) {
			metrics::counter!("banter_messages_duplicate_total").increment(1);
			debug!(id = %message.id, "duplicate message ignored");
			return false;
		}

		self.index.insert(message.id, self.messages.len());
		self.messages.push(message);
		metrics::counter!("banter_messages_merged_total").increment(1);
		true
	}

	/// Merge a whole batch, typically a history snapshot. Returns how
	/// many messages were new.
	pub fn merge_history(&mut self, batch: Vec<Message>) -> usize {
		let mut added = 0;
		for message in batch {
			if self.merge(message) {
				added += 1;
			}
		}
		added
	}

	/// Snapshot in display order, recomputed on every call. Ties on
	/// equal timestamps keep arrival order.
	pub fn ordered_view(&self, order: SortOrder) -> Vec<Message> {
		let mut view = self.messages.clone();
		view.sort_by(|a, b| match order {
			SortOrder::NewestFirst => b.created_at.cmp(&a.created_at),
			SortOrder::OldestFirst => a.created_at.cmp(&b.created_at),
		});
		view
	}
}

#[cfg(test)]
mod tests {
	use banter_domain::{Timestamp, Username};
	use proptest::prelude::*;

	use super::*;

	fn msg(text: &str, created_at: &str) -> Message {
		Message {
			id: MessageId::new_v4(),
			text: text.to_string(),
			owner: Username::new("julia").expect("valid username"),
			created_at: Timestamp::new(created_at).expect("valid timestamp"),
		}
	}

	#[test]
	fn merge_ignores_duplicate_ids() {
		let mut store = MessageStore::new();
		let original = msg("hello", "2024-01-01T00:00:00Z");

		let mut echo = original.clone();
		echo.text = "hello (echo)".to_string();

		assert!(store.merge(original.clone()));
		assert!(!store.merge(echo));

		assert_eq!(store.len(), 1);
		assert_eq!(store.get(original.id).map(|m| m.text.as_str()), Some("hello"));
	}

	#[test]
	fn history_landing_after_live_appends_loses_nothing() {
		let mut store = MessageStore::new();

		let live = msg("live append", "2024-01-03T00:00:00Z");
		assert!(store.merge(live.clone()));

		let history = vec![
			msg("first", "2024-01-01T00:00:00Z"),
			msg("second", "2024-01-02T00:00:00Z"),
			live.clone(),
		];
		let added = store.merge_history(history);

		assert_eq!(added, 2);
		assert_eq!(store.len(), 3);
		assert!(store.contains(live.id));
	}

	#[test]
	fn ordered_view_sorts_by_created_at() {
		let mut store = MessageStore::new();
		store.merge(msg("older", "2024-01-01T00:00:00Z"));
		store.merge(msg("newer", "2024-01-02T00:00:00Z"));

		let newest_first = store.ordered_view(SortOrder::NewestFirst);
		assert_eq!(newest_first[0].text, "newer");
		assert_eq!(newest_first[1].text, "older");

		let oldest_first = store.ordered_view(SortOrder::OldestFirst);
		assert_eq!(oldest_first[0].text, "older");
		assert_eq!(oldest_first[1].text, "newer");
	}

	#[test]
	fn equal_timestamps_keep_arrival_order() {
		let mut store = MessageStore::new();
		store.merge(msg("first in", "2024-01-01T00:00:00Z"));
		store.merge(msg("second in", "2024-01-01T00:00:00Z"));

		for order in [SortOrder::NewestFirst, SortOrder::OldestFirst] {
			let view = store.ordered_view(order);
			assert_eq!(view[0].text, "first in", "arrival order broken under {order:?}");
			assert_eq!(view[1].text, "second in");
		}
	}

	#[test]
	fn sort_order_parses_both_spellings() {
		assert_eq!("newest_first".parse::<SortOrder>().unwrap(), SortOrder::NewestFirst);
		assert_eq!("ASC".parse::<SortOrder>().unwrap(), SortOrder::OldestFirst);
		assert!("sideways".parse::<SortOrder>().is_err());
	}

	fn arrival_plan() -> impl Strategy<Value = (Vec<String>, Vec<usize>)> {
		prop::collection::vec("[a-z]{1,8}", 1..8).prop_flat_map(|texts| {
			let indices: Vec<usize> = (0..texts.len()).collect();
			(Just(texts), Just(indices).prop_shuffle())
		})
	}

	proptest! {
		// Any prefix of the messages may arrive live, in any order,
		// before the full history snapshot lands. Nothing is lost and
		// nothing is doubled.
		#[test]
		fn late_history_never_loses_live_appends((texts, arrival) in arrival_plan()) {
			let all: Vec<Message> = texts
				.iter()
				.enumerate()
				.map(|(i, text)| msg(text, &format!("2024-01-01T00:00:{:02}Z", i % 60)))
				.collect();

			let mut store = MessageStore::new();

			let live_count = arrival.len() / 2 + 1;
			for &i in arrival.iter().take(live_count) {
				store.merge(all[i].clone());
			}

			store.merge_history(all.clone());

			prop_assert_eq!(store.len(), all.len());
			for message in &all {
				prop_assert!(store.contains(message.id));
			}
			prop_assert_eq!(store.ordered_view(SortOrder::NewestFirst).len(), all.len());
		}
	}
}
