use std::time::Duration;

use serde::{Deserialize, Serialize};
use v_utils::macros::{MyConfigPrimitives, Settings, SettingsNested};

/// Read from `~/.config/quiz_headless.{toml,json,..}`, `QUIZ_HEADLESS_*` env vars and CLI flags. Every field has a
/// default, so no file is needed.
#[derive(Clone, Debug, MyConfigPrimitives, Settings)]
pub struct AppConfig {
	/// Number of retries for transient AI errors before falling back to the first option (default: 2)
	#[serde(default = "default_api_retries")]
	pub api_retries: u32,
	/// Base delay in ms between AI retries, multiplied by attempt number (default: 1000)
	#[serde(default = "default_api_retry_delay_ms")]
	pub api_retry_delay_ms: u64,
	#[serde(default)]
	#[settings(flatten)]
	pub timings: Timings,
}

impl Default for AppConfig {
	fn default() -> Self {
		Self {
			api_retries: default_api_retries(),
			api_retry_delay_ms: default_api_retry_delay_ms(),
			timings: Timings::default(),
		}
	}
}

fn default_api_retries() -> u32 {
	2
}

fn default_api_retry_delay_ms() -> u64 {
	1000
}

impl AppConfig {
	pub fn api_retry_delay(&self, attempt: u32) -> Duration {
		Duration::from_millis(self.api_retry_delay_ms * u64::from(attempt))
	}
}

/// Fixed waits, all in milliseconds. None of these adapt at runtime.
#[derive(Clone, Debug, Deserialize, Serialize, SettingsNested)]
#[serde(default)]
pub struct Timings {
	/// Before scanning a page, for dynamic content to render
	pub initial_settle: u64,
	/// After selecting an option
	pub select_settle: u64,
	/// After a wrong/unknown outcome, before the next trial
	pub retry_settle: u64,
	/// For the feedback popup to render after "Check Answer"
	pub modal_wait: u64,
	/// After dismissing the feedback popup
	pub dismiss_settle: u64,
	/// After the last question group, before asking for navigation
	pub post_pass_settle: u64,
	pub nav_poll_interval: u64,
	/// How long the embedding iframe is watched for a new `src`
	pub nav_detect_window: u64,
	/// Flat timeout racing the iframe watch
	pub nav_fallback: u64,
	/// Render wait before resuming an interrupted run
	pub resume_delay: u64,
	/// How long a nested context waits for the top to resolve a popup
	pub modal_relay_timeout: u64,
}

impl Default for Timings {
	fn default() -> Self {
		Self {
			initial_settle: 1500,
			select_settle: 800,
			retry_settle: 500,
			modal_wait: 1800,
			dismiss_settle: 500,
			post_pass_settle: 1500,
			nav_poll_interval: 250,
			nav_detect_window: 10_000,
			nav_fallback: 5000,
			resume_delay: 2500,
			modal_relay_timeout: 5000,
		}
	}
}

impl Timings {
	pub fn ms(value: u64) -> Duration {
		Duration::from_millis(value)
	}
}
