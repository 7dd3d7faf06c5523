#![forbid(unsafe_code)]

mod bot;
mod config;

use std::sync::Arc;

use anyhow::Context as _;
use banter_domain::Username;
use banter_remote::memory::{MemoryChat, MemoryChatConfig};
use banter_remote::{Identity, MessageSubmissionService as _, NewMessage};
use banter_session::{
	ChatView, SendId, SendStatus, SessionConfig, SessionEvent, SessionHandle, SessionServices, SessionView, SortOrder,
	spawn_session,
};
use tokio::io::{AsyncBufReadExt as _, BufReader};
use tracing::{info, warn};

use crate::bot::ChatterBot;

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: banter [--user NAME] [--order newest|oldest]\n\
\n\
Options:\n\
\t--user    Username to sign in as (overrides config)\n\
\t--order   Display order for /list (newest|oldest)\n\
\t--help    Show this help\n\
"
	);
	std::process::exit(2)
}

#[derive(Default)]
struct CliArgs {
	username: Option<String>,
	sort_order: Option<SortOrder>,
}

fn parse_args() -> CliArgs {
	let mut args = CliArgs::default();

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"--user" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				if v.trim().is_empty() {
					eprintln!("--user must be non-empty");
					usage_and_exit();
				}
				args.username = Some(v);
			}
			"--order" => {
				let v = it.next().unwrap_or_else(|| usage_and_exit());
				match v.parse::<SortOrder>() {
					Ok(order) => args.sort_order = Some(order),
					Err(e) => {
						eprintln!("{e}");
						usage_and_exit();
					}
				}
			}
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	args
}

fn init_tracing() {
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,banter_session=debug".to_string());
	tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<std::net::SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

/// Seed canned history through the regular write path so the session has
/// something to load.
async fn seed_history(backend: &MemoryChat, seeder: &Identity, count: usize) -> anyhow::Result<()> {
	let auth = seeder.context();

	for n in 0..count {
		let new = NewMessage {
			text: bot::OPENING_LINES[n % bot::OPENING_LINES.len()].to_string(),
			owner: seeder.username.clone(),
		};
		backend.create_message(&auth, new).await.context("seed history")?;
	}

	Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	init_tracing();

	let args = parse_args();

	let config_path = config::default_config_path()?;
	let mut cfg = config::load_cli_config_from_path(&config_path)?;
	info!(path = %config_path.display(), "loaded config (toml + env overrides)");

	if let Some(username) = args.username {
		cfg.username = username;
	}
	if let Some(order) = args.sort_order {
		cfg.sort_order = order;
	}

	init_metrics(cfg.metrics_bind.as_deref());

	let username = Username::new(&cfg.username).context("invalid username")?;
	let bot_name = Username::new(&cfg.demo.bot_name).context("invalid bot name")?;

	let backend = MemoryChat::new(MemoryChatConfig::default());

	// The bot signs in first so the ambient current-user slot ends up on
	// the human when the session resolves its identity.
	let bot_identity = backend.sign_in(bot_name).await;
	seed_history(&backend, &bot_identity, cfg.demo.seed_count).await?;

	let identity = backend.sign_in(username.clone()).await;
	info!(user = %identity.username, "signed in");

	let services = SessionServices::from_backend(Arc::new(backend.clone()));
	let (handle, mut events) = spawn_session(
		services,
		SessionConfig {
			sort_order: cfg.sort_order,
			..SessionConfig::default()
		},
	);

	let bot_task = cfg
		.demo
		.bot_enabled
		.then(|| ChatterBot::new(bot_identity, cfg.demo.bot_interval).spawn(backend.clone()));

	println!("signed in as {username}. Type a message, or /help for commands.");

	let stdin = BufReader::new(tokio::io::stdin());
	let mut lines = stdin.lines();

	loop {
		tokio::select! {
			line = lines.next_line() => {
				let Some(line) = line.context("read stdin")? else {
					break;
				};

				if !handle_line(&handle, line.trim()).await? {
					break;
				}
			}

			ev = events.recv() => {
				let Some(ev) = ev else {
					warn!("session task stopped; exiting");
					break;
				};
				render_event(&username, &ev);
			}
		}
	}

	let _ = handle.shutdown().await;
	if let Some(task) = bot_task {
		task.abort();
	}

	Ok(())
}

fn print_help() {
	println!(
		"commands:\n\
\t/list          show messages and outbox state\n\
\t/retry <id>    re-submit a failed send\n\
\t/refresh       re-resolve the signed-in identity\n\
\t/signout       sign out (the session keeps running)\n\
\t/quit          exit\n\
anything else is sent as a message"
	);
}

/// Returns `false` when the user asked to quit.
async fn handle_line(handle: &SessionHandle, line: &str) -> anyhow::Result<bool> {
	if line.is_empty() {
		return Ok(true);
	}

	if let Some(rest) = line.strip_prefix("/retry") {
		match rest.trim().parse::<u64>() {
			Ok(n) => handle.retry_send(SendId(n)).await?,
			Err(_) => println!("usage: /retry <send-id>"),
		}
		return Ok(true);
	}

	match line {
		"/help" => print_help(),
		"/list" => print_snapshot(handle).await?,
		"/refresh" => handle.refresh_identity().await?,
		"/signout" => handle.sign_out().await?,
		"/quit" | "/exit" => return Ok(false),
		_ if line.starts_with('/') => println!("unknown command: {line} (try /help)"),
		_ => {
			handle.edit_draft(line).await?;
			handle.submit_draft().await?;
		}
	}

	Ok(true)
}

async fn print_snapshot(handle: &SessionHandle) -> anyhow::Result<()> {
	match handle.snapshot().await? {
		SessionView::Loading => println!("(still resolving identity)"),
		SessionView::SignedOut => println!("(signed out; messages are unavailable)"),
		SessionView::Chat(view) => print_chat(&view),
	}

	Ok(())
}

fn print_chat(view: &ChatView) {
	if view.messages.is_empty() {
		println!("(no messages yet)");
	}

	for msg in &view.messages {
		let marker = if view.is_mine(msg) { "*" } else { " " };
		println!("{marker} {} {}: {}", msg.created_at, msg.owner, msg.text);
	}

	for receipt in &view.outbox {
		match &receipt.status {
			SendStatus::Pending => println!("  [#{} pending] {}", receipt.send_id, receipt.text),
			SendStatus::Failed { reason } => println!(
				"  [#{} failed: {reason}] {} (use /retry {})",
				receipt.send_id, receipt.text, receipt.send_id
			),
			SendStatus::Confirmed => {}
		}
	}

	println!("  live feed: {:?}", view.live);
}

fn render_event(me: &Username, ev: &SessionEvent) {
	match ev {
		SessionEvent::IdentityChanged { username: Some(u) } => println!("(signed in as {u})"),
		SessionEvent::IdentityChanged { username: None } => println!("(signed out)"),
		SessionEvent::HistoryLoaded { added } => println!("(history loaded: {added} new messages; /list to show)"),
		SessionEvent::MessageReceived(msg) => {
			let marker = if &msg.owner == me { "*" } else { " " };
			println!("{marker} {}: {}", msg.owner, msg.text);
		}
		SessionEvent::FeedLagged { dropped } => warn!(dropped = *dropped, "live feed lagged"),
		SessionEvent::LiveFeedEnded { reason } => println!("(live feed ended: {reason})"),
		SessionEvent::SendFailed { send_id, reason } => println!("(send #{send_id} failed: {reason}; /retry {send_id})"),
		SessionEvent::SendConfirmed { send_id } => println!("(send #{send_id} delivered)"),
	}
}
