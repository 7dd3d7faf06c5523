#![forbid(unsafe_code)]

use std::fmt;

/// Session-local identifier for one tracked submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SendId(pub u64);

impl fmt::Display for SendId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Delivery status of an optimistic send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendStatus {
	/// Submitted; waiting for the backend echo on the live feed.
	Pending,

	/// The echo arrived; the message is in the store.
	Confirmed,

	/// Submission failed; eligible for retry.
	Failed {
		reason: String,
	},
}

/// One tracked submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
	pub send_id: SendId,
	pub text: String,
	pub status: SendStatus,
}

/// Tracks every submission of a session, oldest first.
///
/// The draft itself is cleared optimistically at submit time and never
/// restored; the receipt is what keeps a failed send visible and
/// retryable instead of silently lost.
#[derive(Debug, Default)]
pub struct Outbox {
	next_id: u64,
	entries: Vec<SendReceipt>,
}

impl Outbox {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn entries(&self) -> &[SendReceipt] {
		&self.entries
	}

	pub fn get(&self, send_id: SendId) -> Option<&SendReceipt> {
		self.entries.iter().find(|e| e.send_id == send_id)
	}

	pub fn pending_count(&self) -> usize {
		self.entries.iter().filter(|e| e.status == SendStatus::Pending).count()
	}

	/// Register a new pending submission.
	pub fn begin(&mut self, text: impl Into<String>) -> SendId {
		let send_id = SendId(self.next_id);
		self.next_id += 1;
		self.entries.push(SendReceipt {
			send_id,
			text: text.into(),
			status: SendStatus::Pending,
		});
		send_id
	}

	/// Mark a pending entry failed. Entries already confirmed by their
	/// echo stay confirmed. Returns true when the entry flipped.
	pub fn mark_failed(&mut self, send_id: SendId, reason: impl Into<String>) -> bool {
		match self.entry_mut(send_id) {
			Some(entry) if entry.status == SendStatus::Pending => {
				entry.status = SendStatus::Failed { reason: reason.into() };
				true
			}
			_ => false,
		}
	}

	/// Flip a failed entry back to pending for a retry and hand back the
	/// text to resubmit. Anything not in a failed state is refused.
	pub fn begin_retry(&mut self, send_id: SendId) -> Option<String> {
		let entry = self.entry_mut(send_id)?;
		match entry.status {
			SendStatus::Failed { .. } => {
				entry.status = SendStatus::Pending;
				Some(entry.text.clone())
			}
			_ => None,
		}
	}

	/// Confirm the oldest pending entry matching an echoed message text.
	/// Returns its id when one flipped.
	pub fn confirm_echo(&mut self, text: &str) -> Option<SendId> {
		let entry = self
			.entries
			.iter_mut()
			.find(|e| e.status == SendStatus::Pending && e.text == text)?;
		entry.status = SendStatus::Confirmed;
		Some(entry.send_id)
	}

	fn entry_mut(&mut self, send_id: SendId) -> Option<&mut SendReceipt> {
		self.entries.iter_mut().find(|e| e.send_id == send_id)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn begin_registers_a_pending_entry() {
		let mut outbox = Outbox::new();
		let id = outbox.begin("hello");

		assert_eq!(outbox.pending_count(), 1);
		assert_eq!(outbox.get(id).map(|e| &e.status), Some(&SendStatus::Pending));
	}

	#[test]
	fn failed_entries_can_retry_and_others_cannot() {
		let mut outbox = Outbox::new();
		let id = outbox.begin("hello");

		assert!(outbox.begin_retry(id).is_none(), "pending entries must not retry");

		assert!(outbox.mark_failed(id, "backend down"));
		assert_eq!(outbox.begin_retry(id).as_deref(), Some("hello"));
		assert_eq!(outbox.get(id).map(|e| &e.status), Some(&SendStatus::Pending));

		outbox.confirm_echo("hello");
		assert!(outbox.begin_retry(id).is_none(), "confirmed entries must not retry");
		assert!(!outbox.mark_failed(id, "late failure"), "confirmed entries stay confirmed");
	}

	#[test]
	fn echo_confirms_the_oldest_matching_pending_entry() {
		let mut outbox = Outbox::new();
		let first = outbox.begin("same text");
		let second = outbox.begin("same text");

		assert_eq!(outbox.confirm_echo("same text"), Some(first));
		assert_eq!(outbox.get(first).map(|e| &e.status), Some(&SendStatus::Confirmed));
		assert_eq!(outbox.get(second).map(|e| &e.status), Some(&SendStatus::Pending));

		assert_eq!(outbox.confirm_echo("other text"), None);
	}
}
