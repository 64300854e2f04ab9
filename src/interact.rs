//! Synthetic user interaction.
//!
//! Rust decides *what* to do and expresses it as an [`Interaction`]; `interact.js` replays it page-side with the full
//! native event sequence (`mousedown`, `mouseup`, `click`, then `change` and `input`), since the host UI ignores
//! bare property assignment.

use serde::Serialize;

use crate::{
	Handle, QuestionGroup,
	dom::DomSnapshot,
	extract::associated_label,
};

/// Page-side replay function, called as `(win, action)`
pub const REPLAY_JS: &str = include_str!("interact.js");

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Interaction {
	/// Scroll into view, focus, then the full event sequence
	Click { target: Handle },
	/// Uncheck the siblings, check `target` through the native property setter, click it, then click its label
	SelectRadio {
		target: Handle,
		siblings: Vec<Handle>,
		label: Option<Handle>,
	},
}

impl Interaction {
	pub fn target(&self) -> Handle {
		match self {
			Interaction::Click { target } | Interaction::SelectRadio { target, .. } => *target,
		}
	}

	pub fn is_selection(&self) -> bool {
		matches!(self, Interaction::SelectRadio { .. })
	}
}

/// Plan the selection of option `idx` of `group`, or `None` if there is no such option
pub fn plan_select(dom: &DomSnapshot, group: &QuestionGroup, idx: usize) -> Option<Interaction> {
	let option = group.option(idx)?;
	let siblings = group.options.iter().filter(|o| o.handle != option.handle).map(|o| o.handle).collect();
	let label = associated_label(dom, option.node).and_then(|l| dom.handle(l));
	Some(Interaction::SelectRadio {
		target: option.handle,
		siblings,
		label,
	})
}
