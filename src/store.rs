//! Persistent key/value settings: the AI credential and the resume flag

use std::{cell::RefCell, collections::BTreeMap, path::PathBuf};

use color_eyre::{Result, eyre::eyre};

pub const API_KEY: &str = "api_key";
pub const AUTO_SOLVING: &str = "auto_solving";

pub trait KvStore {
	fn get(&self, key: &str) -> Option<String>;
	fn set(&self, key: &str, value: &str) -> Result<()>;
	fn remove(&self, key: &str) -> Result<()>;

	fn auto_solving(&self) -> bool {
		self.get(AUTO_SOLVING).as_deref() == Some("true")
	}

	fn set_auto_solving(&self, on: bool) -> Result<()> {
		if on { self.set(AUTO_SOLVING, "true") } else { self.remove(AUTO_SOLVING) }
	}
}

/// Where the store lives by default
#[cfg(feature = "xdg")]
pub fn settings_dir() -> PathBuf {
	v_utils::xdg_state_dir!("settings")
}

#[cfg(not(feature = "xdg"))]
pub fn settings_dir() -> PathBuf {
	PathBuf::from(".quiz_headless")
}

/// Flat JSON object on disk, rewritten on every change
#[derive(Debug)]
pub struct JsonFileStore {
	path: PathBuf,
	entries: RefCell<BTreeMap<String, String>>,
}

impl JsonFileStore {
	pub fn open(path: PathBuf) -> Result<Self> {
		let entries = if path.exists() {
			let raw = std::fs::read_to_string(&path).map_err(|e| eyre!("Failed to read store {}: {}", path.display(), e))?;
			serde_json::from_str(&raw).map_err(|e| eyre!("Failed to parse store {}: {}", path.display(), e))?
		} else {
			BTreeMap::new()
		};
		Ok(Self {
			path,
			entries: RefCell::new(entries),
		})
	}

	/// `store.json` in the settings dir
	pub fn default_path() -> PathBuf {
		settings_dir().join("store.json")
	}

	pub fn path(&self) -> &std::path::Path {
		&self.path
	}

	fn flush(&self) -> Result<()> {
		if let Some(dir) = self.path.parent() {
			std::fs::create_dir_all(dir).map_err(|e| eyre!("Failed to create store dir: {}", e))?;
		}
		let json = serde_json::to_string_pretty(&*self.entries.borrow()).map_err(|e| eyre!("Failed to serialize store: {}", e))?;
		std::fs::write(&self.path, json).map_err(|e| eyre!("Failed to write store {}: {}", self.path.display(), e))
	}
}

impl KvStore for JsonFileStore {
	fn get(&self, key: &str) -> Option<String> {
		self.entries.borrow().get(key).cloned()
	}

	fn set(&self, key: &str, value: &str) -> Result<()> {
		self.entries.borrow_mut().insert(key.to_string(), value.to_string());
		self.flush()
	}

	fn remove(&self, key: &str) -> Result<()> {
		if self.entries.borrow_mut().remove(key).is_some() {
			self.flush()?;
		}
		Ok(())
	}
}

/// In-memory store, for runs that must not touch disk
#[derive(Debug, Default)]
pub struct MemoryStore {
	entries: RefCell<BTreeMap<String, String>>,
}

impl KvStore for MemoryStore {
	fn get(&self, key: &str) -> Option<String> {
		self.entries.borrow().get(key).cloned()
	}

	fn set(&self, key: &str, value: &str) -> Result<()> {
		self.entries.borrow_mut().insert(key.to_string(), value.to_string());
		Ok(())
	}

	fn remove(&self, key: &str) -> Result<()> {
		self.entries.borrow_mut().remove(key);
		Ok(())
	}
}
