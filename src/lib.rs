use std::fmt;

use derive_new::new;
use serde::{Deserialize, Serialize};

pub mod browser;
pub mod completion;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod dom;
pub mod extract;
pub mod interact;
pub mod llm;
pub mod modal;
pub mod orchestrator;
pub mod solver;
pub mod store;

/// Stable page-side reference to an element, valid for as long as the element lives
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Handle(pub u32);

impl fmt::Display for Handle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// Which kind of execution context a frame is
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContextKind {
	/// The top-level document. Owns navigation and answers relayed requests.
	Top,
	/// A same-origin iframe document. Delegates navigation and unresolved modals to the top.
	Nested,
}

/// A single selectable control, as read from one snapshot
#[derive(Clone, Debug, PartialEq, new)]
pub struct OptionElement {
	/// Page-side handle of the control
	pub handle: Handle,
	/// Node of the control inside the snapshot it was read from
	pub node: dom::NodeId,
	/// Shared by every option of one question
	pub group_key: String,
	/// `value` attribute, if any
	pub value: Option<String>,
	pub disabled: bool,
	/// Best-effort label text, see [`extract::extract_label`]
	pub label: String,
}

/// All options sharing one group key, in discovery order
#[derive(Clone, Debug, PartialEq, new)]
pub struct QuestionGroup {
	pub key: String,
	pub options: Vec<OptionElement>,
}

impl QuestionGroup {
	pub fn len(&self) -> usize {
		self.options.len()
	}

	pub fn is_empty(&self) -> bool {
		self.options.is_empty()
	}

	pub fn option(&self, idx: usize) -> Option<&OptionElement> {
		self.options.get(idx)
	}

	pub fn handles(&self) -> Vec<Handle> {
		self.options.iter().map(|o| o.handle).collect()
	}

	pub fn labels(&self) -> Vec<String> {
		self.options.iter().map(|o| o.label.clone()).collect()
	}
}

/// Everything the solver knows about one question while it is being solved
#[derive(Clone, Debug, PartialEq)]
pub struct QuestionRecord {
	/// Extracted prompt, or [`extract::UNKNOWN_QUESTION`]
	pub prompt: String,
	/// Option labels, index-aligned with the group's options
	pub options: Vec<String>,
	/// Index suggested by the AI (or the fallback 0)
	pub suggested: Option<usize>,
	/// Order in which option indices get tried
	pub trial_order: Vec<usize>,
}

impl QuestionRecord {
	pub fn new(prompt: String, options: Vec<String>) -> Self {
		Self {
			prompt,
			options,
			suggested: None,
			trial_order: Vec::new(),
		}
	}

	/// Whether the prompt was actually read off the page
	pub fn prompt_known(&self) -> bool {
		self.prompt != extract::UNKNOWN_QUESTION
	}

	/// Record the suggested index and derive the trial order from it
	pub fn adopt_suggestion(&mut self, idx: usize) {
		let idx = if idx < self.options.len() { idx } else { 0 };
		self.suggested = Some(idx);
		self.trial_order = solver::trial_order(idx, self.options.len());
	}
}

impl fmt::Display for QuestionRecord {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		writeln!(f, "{}", self.prompt)?;
		writeln!(f)?;
		for (i, option) in self.options.iter().enumerate() {
			let marker = if self.suggested == Some(i) { "(*)" } else { "( )" };
			writeln!(f, "{} {}. {}", marker, i + 1, option)?;
		}
		Ok(())
	}
}

/// How the feedback popup after "Check Answer" was classified
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ModalOutcome {
	Correct,
	Wrong,
	/// No recognizable control within the allotted wait. Never counts as success.
	Unknown,
}

impl fmt::Display for ModalOutcome {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			ModalOutcome::Correct => "correct",
			ModalOutcome::Wrong => "wrong",
			ModalOutcome::Unknown => "unknown",
		};
		f.write_str(s)
	}
}
