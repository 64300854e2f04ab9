//! Whether a question was already answered

use crate::{QuestionGroup, dom::DomSnapshot};

const CONTAINER_HOPS: usize = 20;
const CONTAINER_MARKER: &str = "check your understanding";

/// Completion status of one question group.
///
/// Looks for the nearest "Check Your Understanding" container and reads its status marker. `INCOMPLETE` is checked
/// first, it contains `COMPLETE`. Without such a container, the group is complete iff every option is disabled.
pub fn is_complete(dom: &DomSnapshot, group: &QuestionGroup) -> bool {
	let Some(first) = group.option(0) else {
		return false;
	};

	let container = dom
		.logical_ancestors(first.node)
		.take(CONTAINER_HOPS)
		.map(|a| dom.deep_text(a))
		.find(|text| text.to_lowercase().contains(CONTAINER_MARKER));

	if let Some(text) = container {
		if text.contains("INCOMPLETE") {
			return false;
		}
		if text.contains("COMPLETE") {
			return true;
		}
	}

	group.options.iter().all(|o| o.disabled)
}

#[cfg(test)]
mod tests {
	use serde_json::{Value, json};

	use super::*;
	use crate::extract::scan_groups;

	fn card(status: &str, disabled: bool) -> Value {
		json!({
			"tag": "#document",
			"children": [{ "tag": "section", "children": [
				{ "tag": "h3", "children": [{ "text": "Check Your Understanding" }] },
				{ "tag": "span", "children": [{ "text": status }] },
				{ "tag": "input", "handle": 1, "disabled": disabled, "attrs": { "type": "radio", "name": "q" } },
				{ "tag": "input", "handle": 2, "disabled": disabled, "attrs": { "type": "radio", "name": "q" } }
			]}]
		})
	}

	fn complete(value: Value) -> bool {
		let dom = DomSnapshot::from_value(value).unwrap();
		let groups = scan_groups(&dom);
		is_complete(&dom, &groups[0])
	}

	#[test]
	fn status_marker_decides() {
		assert!(complete(card("COMPLETE", false)));
		assert!(!complete(card("INCOMPLETE", true)));
	}

	#[test]
	fn falls_back_to_disabled_options() {
		assert!(complete(card("", true)));
		assert!(!complete(card("", false)));

		let bare = json!({ "tag": "#document", "children": [
			{ "tag": "input", "handle": 1, "disabled": true, "attrs": { "type": "radio", "name": "q" } },
			{ "tag": "input", "handle": 2, "attrs": { "type": "radio", "name": "q" } }
		]});
		assert!(!complete(bare));
	}
}
