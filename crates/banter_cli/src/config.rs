#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use banter_session::SortOrder;
use serde::Deserialize;
use tracing::{info, warn};

/// Default config path: `~/.banter/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".banter").join("config.toml"))
}

/// Load the CLI config from TOML and env overrides.
pub fn load_cli_config_from_path(path: &Path) -> anyhow::Result<CliConfig> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = CliConfig::from_file(file_cfg);

	apply_env_overrides(&mut cfg);

	Ok(cfg)
}

/// CLI config (v1).
#[derive(Debug, Clone)]
pub struct CliConfig {
	/// Username signed in at startup.
	pub username: String,
	/// Display order for rendered snapshots.
	pub sort_order: SortOrder,
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	pub demo: DemoSettings,
}

/// Demo backend settings.
#[derive(Debug, Clone)]
pub struct DemoSettings {
	/// Canned history messages seeded before the session starts.
	pub seed_count: usize,
	/// Whether the companion bot posts on a timer.
	pub bot_enabled: bool,
	/// Bot posting cadence.
	pub bot_interval: Duration,
	/// Username the bot signs in as.
	pub bot_name: String,
}

impl Default for CliConfig {
	fn default() -> Self {
		Self {
			username: "guest".to_string(),
			sort_order: SortOrder::default(),
			metrics_bind: None,
			demo: DemoSettings::default(),
		}
	}
}

impl Default for DemoSettings {
	fn default() -> Self {
		Self {
			seed_count: 3,
			bot_enabled: true,
			bot_interval: Duration::from_secs(4),
			bot_name: "banterbot".to_string(),
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	username: Option<String>,
	sort_order: Option<String>,
	metrics_bind: Option<String>,

	#[serde(default)]
	demo: FileDemoSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileDemoSettings {
	seed_count: Option<usize>,
	bot_enabled: Option<bool>,
	bot_interval_ms: Option<u64>,
	bot_name: Option<String>,
}

impl CliConfig {
	fn from_file(file: FileConfig) -> Self {
		let defaults = Self::default();

		Self {
			username: file
				.username
				.filter(|s| !s.trim().is_empty())
				.unwrap_or(defaults.username),
			sort_order: file
				.sort_order
				.as_deref()
				.and_then(parse_sort_order)
				.unwrap_or(defaults.sort_order),
			metrics_bind: file.metrics_bind.filter(|s| !s.trim().is_empty()),
			demo: DemoSettings {
				seed_count: file.demo.seed_count.unwrap_or(defaults.demo.seed_count),
				bot_enabled: file.demo.bot_enabled.unwrap_or(defaults.demo.bot_enabled),
				bot_interval: file
					.demo
					.bot_interval_ms
					.map(Duration::from_millis)
					.unwrap_or(defaults.demo.bot_interval),
				bot_name: file
					.demo
					.bot_name
					.filter(|s| !s.trim().is_empty())
					.unwrap_or(defaults.demo.bot_name),
			},
		}
	}
}

fn parse_sort_order(raw: &str) -> Option<SortOrder> {
	match raw.parse::<SortOrder>() {
		Ok(order) => Some(order),
		Err(e) => {
			warn!(error = %e, "ignoring invalid sort_order");
			None
		}
	}
}

fn parse_env_bool(v: &str) -> Option<bool> {
	match v.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn apply_env_overrides(cfg: &mut CliConfig) {
	if let Ok(v) = std::env::var("BANTER_USERNAME") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.username = v;
			info!("cli config: username overridden by env");
		}
	}

	if let Ok(v) = std::env::var("BANTER_SORT_ORDER")
		&& let Some(order) = parse_sort_order(&v)
	{
		cfg.sort_order = order;
		info!(order = order.as_str(), "cli config: sort_order overridden by env");
	}

	if let Ok(v) = std::env::var("BANTER_METRICS_BIND") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.metrics_bind = Some(v);
			info!("cli config: metrics_bind overridden by env");
		}
	}

	if let Ok(v) = std::env::var("BANTER_SEED_COUNT")
		&& let Ok(count) = v.trim().parse::<usize>()
	{
		cfg.demo.seed_count = count;
		info!(count, "demo config: seed_count overridden by env");
	}

	if let Ok(v) = std::env::var("BANTER_BOT_ENABLED")
		&& let Some(enabled) = parse_env_bool(&v)
	{
		cfg.demo.bot_enabled = enabled;
		info!(enabled, "demo config: bot_enabled overridden by env");
	}

	if let Ok(v) = std::env::var("BANTER_BOT_INTERVAL_MS")
		&& let Ok(ms) = v.trim().parse::<u64>()
	{
		cfg.demo.bot_interval = Duration::from_millis(ms);
		info!(ms, "demo config: bot_interval overridden by env");
	}

	if let Ok(v) = std::env::var("BANTER_BOT_NAME") {
		let v = v.trim().to_string();
		if !v.is_empty() {
			cfg.demo.bot_name = v;
			info!("demo config: bot_name overridden by env");
		}
	}
}
