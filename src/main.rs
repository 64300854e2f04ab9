use std::path::PathBuf;

use chromiumoxide::browser::{Browser, BrowserConfig};
use clap::{Parser, Subcommand};
use color_eyre::{Result, eyre::eyre};
use futures::StreamExt;
use quiz_headless::{
	browser::{CdpFrames, install_open_shadow_patch},
	config::{AppConfig, SettingsFlags},
	coordinator::{Bus, Coordinator},
	llm::LlmAnswerer,
	store::{API_KEY, JsonFileStore, KvStore},
};
use v_utils::{
	elog,
	io::{ConfirmResult, confirmation},
	log,
};

#[derive(Debug, Parser)]
#[command(name = "quiz_headless")]
#[command(about = "Answers embedded multiple-choice knowledge checks, page after page", long_about = None)]
struct Cli {
	#[command(subcommand)]
	command: Commands,

	/// Key/value store file (default: store.json in the state dir)
	#[arg(long, global = true)]
	store: Option<PathBuf>,

	#[command(flatten)]
	settings: SettingsFlags,
}

#[derive(Debug, Subcommand)]
enum Commands {
	/// Open a course page and solve its questions
	Run {
		/// Page to start from
		#[arg(short, long)]
		url: String,

		/// Run with visible browser window (non-headless mode)
		#[arg(long)]
		visible: bool,
	},
	/// Manage the stored AI credential
	Key {
		#[command(subcommand)]
		action: KeyAction,
	},
}

#[derive(Debug, Subcommand)]
enum KeyAction {
	Set { key: String },
	Show,
	Clear,
}

fn main() -> Result<()> {
	color_eyre::install()?;
	let cli = Cli::parse();

	let store = JsonFileStore::open(cli.store.unwrap_or_else(JsonFileStore::default_path))?;

	match cli.command {
		Commands::Key { action } => key_command(&store, action),
		Commands::Run { url, visible } => {
			// `-y` also skips the start prompt
			let yes = cli.settings.yes;
			let config = AppConfig::try_build(cli.settings)?;
			if let Some(key) = store.get(API_KEY) {
				// SAFETY: no other thread exists yet; the runtime is only built below
				unsafe { std::env::set_var("CLAUDE_TOKEN", key) };
			}
			let runtime = tokio::runtime::Builder::new_current_thread()
				.enable_all()
				.build()
				.map_err(|e| eyre!("Failed to build runtime: {}", e))?;
			runtime.block_on(run(url, visible, yes, config, store))
		}
	}
}

fn key_command(store: &JsonFileStore, action: KeyAction) -> Result<()> {
	match action {
		KeyAction::Set { key } => {
			store.set(API_KEY, key.trim())?;
			log!("API key saved to {}", store.path().display());
		}
		KeyAction::Show => match store.get(API_KEY) {
			Some(key) => {
				let shown: String = key.chars().take(6).collect();
				println!("{shown}…");
			}
			None => println!("No API key stored (falling back to CLAUDE_TOKEN from the environment)"),
		},
		KeyAction::Clear => {
			store.remove(API_KEY)?;
			log!("API key removed");
		}
	}
	Ok(())
}

async fn run(url: String, visible: bool, yes: bool, config: AppConfig, store: JsonFileStore) -> Result<()> {
	log!("Visible mode: {}", visible);

	let browser_config = if visible {
		BrowserConfig::builder()
			.with_head() // Visible browser with UI
			.build()
			.map_err(|e| eyre!("Failed to build browser config: {}", e))?
	} else {
		BrowserConfig::builder()
			.build() // Headless mode
			.map_err(|e| eyre!("Failed to build browser config: {}", e))?
	};

	let (mut browser, mut handler) = Browser::launch(browser_config).await.map_err(|e| eyre!("Failed to launch browser: {}", e))?;

	// Spawn a task to handle browser events (suppress errors as they're mostly noise)
	let handle = tokio::spawn(async move {
		while let Some(_event) = handler.next().await {
			// Silently consume events to prevent the browser from hanging
		}
	});

	let page = browser.new_page("about:blank").await.map_err(|e| eyre!("Failed to create new page: {}", e))?;
	if let Err(e) = install_open_shadow_patch(&page).await {
		elog!("{e}. Closed shadow trees will be invisible.");
	}

	log!("Navigating to {url}...");
	page.goto(&url).await.map_err(|e| eyre!("Failed to navigate: {}", e))?;
	tokio::time::sleep(tokio::time::Duration::from_secs(3)).await;

	let (bus, rx) = Bus::new();
	let timings = config.timings.clone();
	let coordinator = Coordinator::new(CdpFrames::new(page.clone()), LlmAnswerer::new(config), store, bus.clone(), timings);

	let local = tokio::task::LocalSet::new();
	local
		.run_until(async {
			if !coordinator.resume_if_flagged().await {
				if !yes && !matches!(confirmation("Start solving on this page?").flush().await, ConfirmResult::Yes) {
					log!("Cancelled by user");
					return;
				}
				bus.start_solving();
			}
			tokio::select! {
				_ = coordinator.run(rx) => log!("✓ Done."),
				_ = tokio::signal::ctrl_c() => log!("Interrupted."),
			}
		})
		.await;

	drop(page);
	browser.close().await.map_err(|e| eyre!("Failed to close browser: {}", e))?;
	drop(browser);
	handle.abort();

	Ok(())
}
