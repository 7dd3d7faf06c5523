#![forbid(unsafe_code)]

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::Context as _;
use banter_domain::{Timestamp, Username};
use banter_remote::memory::{MemoryChat, MemoryChatConfig};
use banter_remote::{MessageSubmissionService as _, NewMessage};
use banter_session::{LiveStatus, SendStatus, SessionConfig, SessionEvent, SessionServices, SessionView, spawn_session};
use tokio::sync::mpsc;
use tokio::time::timeout;

static LOG_INIT: OnceLock<()> = OnceLock::new();

fn init_test_logging() {
	LOG_INIT.get_or_init(|| {
		if std::env::var_os("BANTER_TEST_LOG").is_none() {
			return;
		}

		let _ = tracing_subscriber::fmt()
			.with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "debug".to_string()))
			.with_target(false)
			.try_init();
	});
}

fn user(name: &str) -> Username {
	Username::new(name).expect("valid username")
}

fn ts(raw: &str) -> Timestamp {
	Timestamp::new(raw).expect("valid timestamp")
}

async fn next_matching<F>(
	rx: &mut mpsc::UnboundedReceiver<SessionEvent>,
	what: &str,
	mut pred: F,
) -> anyhow::Result<SessionEvent>
where
	F: FnMut(&SessionEvent) -> bool,
{
	timeout(Duration::from_secs(5), async {
		loop {
			match rx.recv().await {
				Some(ev) if pred(&ev) => return Some(ev),
				Some(_) => continue,
				None => return None,
			}
		}
	})
	.await
	.with_context(|| format!("timeout waiting for {what}"))?
	.with_context(|| format!("event channel closed waiting for {what}"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn session_smoke_history_live_and_echo() -> anyhow::Result<()> {
	init_test_logging();

	let backend = MemoryChat::new(MemoryChatConfig::default());

	// The other participant signs in before the session owner, so the
	// ambient current-user slot stays on the owner.
	let nadia = backend.sign_in(user("nadia")).await;
	backend
		.seed_message(nadia.username.clone(), "welcome", ts("2024-01-01T00:00:00Z"))
		.await;
	backend
		.seed_message(nadia.username.clone(), "second seed", ts("2024-01-02T00:00:00Z"))
		.await;

	let _julia = backend.sign_in(user("julia")).await;

	let services = SessionServices::from_backend(Arc::new(backend.clone()));
	let (handle, mut events) = spawn_session(services, SessionConfig::default());

	let loaded = next_matching(&mut events, "history", |ev| {
		matches!(ev, SessionEvent::HistoryLoaded { .. })
	})
	.await?;
	match loaded {
		SessionEvent::HistoryLoaded { added } => assert_eq!(added, 2),
		other => panic!("expected HistoryLoaded, got: {other:?}"),
	}

	// The other participant posts; the session hears it on the live feed.
	backend
		.create_message(
			&nadia.context(),
			NewMessage {
				text: "did you sleep?".to_string(),
				owner: nadia.username.clone(),
			},
		)
		.await
		.context("post as nadia")?;

	next_matching(&mut events, "live message", |ev| {
		matches!(ev, SessionEvent::MessageReceived(msg) if msg.text == "did you sleep?")
	})
	.await?;

	// Millisecond timestamps tie-break by arrival; keep the owner's
	// message strictly newer than the one above.
	tokio::time::sleep(Duration::from_millis(10)).await;

	handle.edit_draft("good morning").await.context("edit draft")?;
	handle.submit_draft().await.context("submit draft")?;

	next_matching(&mut events, "send confirmation", |ev| {
		matches!(ev, SessionEvent::SendConfirmed { .. })
	})
	.await?;

	let view = match handle.snapshot().await.context("snapshot")? {
		SessionView::Chat(view) => view,
		other => panic!("expected Chat view, got: {other:?}"),
	};

	assert_eq!(view.live, LiveStatus::Streaming);
	assert_eq!(view.draft, "");
	assert_eq!(view.messages.len(), 4);

	assert_eq!(view.messages[0].text, "good morning");
	assert!(view.is_mine(&view.messages[0]));
	assert_eq!(view.messages[1].text, "did you sleep?");
	assert_eq!(view.messages[3].text, "welcome");

	assert_eq!(view.outbox.len(), 1);
	assert_eq!(view.outbox[0].status, SendStatus::Confirmed);

	handle.shutdown().await.context("shutdown")?;

	Ok(())
}
