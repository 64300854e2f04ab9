//! Scraping of option controls, their labels and the question prompt

use std::{collections::HashMap, sync::LazyLock};

use regex::Regex;

use crate::{
	OptionElement, QuestionGroup,
	dom::{DomSnapshot, Matcher, NodeId, normalize_ws},
};

/// Returned when no prompt could be extracted. Not actual question content.
pub const UNKNOWN_QUESTION: &str = "Question text not found";

/// Hops allowed when walking up through ancestors and shadow hosts
const PROMPT_LOGICAL_HOPS: usize = 20;
/// Hops allowed for the plain-parent fallback
const PROMPT_PARENT_HOPS: usize = 10;
const PROMPT_BLOCK_MIN_CHARS: usize = 50;
const PROMPT_BLOCK_MAX_CHARS: usize = 2000;
const MIN_LABEL_CHARS: usize = 3;

static PROMPT_RE: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"(?s)Question\s*(?:\d+\s*(?:of\s*\d+)?)?\s*[:.]?\s*(.*?)\s*Select an Answer").expect("static regex"));
static LETTER_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z]\.\s*").expect("static regex"));

/// Candidate selectors for option controls, most specific first. The first one that matches anything wins.
pub fn option_selectors() -> Vec<Matcher> {
	vec![
		Matcher::All(vec![Matcher::Class("form-check-input"), Matcher::AttrEq("type", "radio")]),
		Matcher::All(vec![Matcher::Tag("input"), Matcher::AttrEq("type", "radio")]),
		Matcher::AttrEq("role", "radio"),
		Matcher::AttrContains("class", "radio"),
	]
}

/// Every option control in the context, found with the first selector that yields matches
pub fn scan_options(dom: &DomSnapshot) -> Vec<OptionElement> {
	let nodes = option_selectors()
		.iter()
		.map(|m| dom.deep_query_all(dom.root(), m))
		.find(|found| !found.is_empty())
		.unwrap_or_default();

	nodes
		.into_iter()
		.filter_map(|node| {
			let handle = dom.handle(node)?;
			Some(OptionElement::new(
				handle,
				node,
				group_key(dom, node),
				dom.attr(node, "value").map(str::to_owned),
				dom.node(node).disabled || dom.attr(node, "aria-disabled") == Some("true"),
				extract_label(dom, node),
			))
		})
		.collect()
}

/// Key shared by all options of one question: the `name` attribute, else the nearest radiogroup
fn group_key(dom: &DomSnapshot, node: NodeId) -> String {
	if let Some(name) = dom.attr(node, "name").filter(|n| !n.is_empty()) {
		return format!("name:{name}");
	}
	let radiogroup = Matcher::AttrEq("role", "radiogroup");
	if let Some(group) = dom.logical_ancestors(node).find(|&a| radiogroup.matches(dom, a))
		&& let Some(handle) = dom.handle(group)
	{
		return format!("radiogroup:{}", handle.0);
	}
	match dom.handle(node) {
		Some(handle) => format!("solo:{}", handle.0),
		None => "solo:?".to_string(),
	}
}

/// Partition options by group key. Groups keep the order in which their first option was discovered.
pub fn group_options(options: Vec<OptionElement>) -> Vec<QuestionGroup> {
	let mut groups: Vec<QuestionGroup> = Vec::new();
	let mut index: HashMap<String, usize> = HashMap::new();
	for option in options {
		match index.get(&option.group_key) {
			Some(&i) => groups[i].options.push(option),
			None => {
				index.insert(option.group_key.clone(), groups.len());
				groups.push(QuestionGroup::new(option.group_key.clone(), vec![option]));
			}
		}
	}
	groups
}

/// Scan and group in one go
pub fn scan_groups(dom: &DomSnapshot) -> Vec<QuestionGroup> {
	group_options(scan_options(dom))
}

/// Strip an `A. `-style prefix and surrounding whitespace
pub fn clean_label(raw: &str) -> String {
	let trimmed = normalize_ws(raw);
	LETTER_PREFIX_RE.replace(&trimmed, "").trim().to_string()
}

fn usable(text: String) -> Option<String> {
	let cleaned = clean_label(&text);
	(cleaned.chars().count() > MIN_LABEL_CHARS).then_some(cleaned)
}

fn enclosing_label(dom: &DomSnapshot, option: NodeId) -> Option<NodeId> {
	dom.parents(option).find(|&p| dom.tag(p) == Some("label"))
}

fn linked_label(dom: &DomSnapshot, option: NodeId) -> Option<NodeId> {
	let id = dom.attr(option, "id").filter(|id| !id.is_empty())?;
	let root = dom.tree_root(option);
	dom.query_all(root, &Matcher::Tag("label")).into_iter().find(|&l| dom.attr(l, "for") == Some(id))
}

/// Label element wrapping the option, or linked to it through `for`/`id`
pub fn associated_label(dom: &DomSnapshot, option: NodeId) -> Option<NodeId> {
	enclosing_label(dom, option).or_else(|| linked_label(dom, option))
}

/// Text describing one option, tried through increasingly loose heuristics
pub fn extract_label(dom: &DomSnapshot, option: NodeId) -> String {
	let parent = dom.parents(option).next();

	let labels = [enclosing_label(dom, option), linked_label(dom, option)];
	if let Some(text) = labels.into_iter().flatten().find_map(|l| usable(dom.deep_text(l))) {
		return text;
	}

	if let Some(text) = dom.next_sibling(option).and_then(|s| usable(dom.deep_text(s))) {
		return text;
	}

	if let Some(parent) = parent {
		let sibling_text = dom
			.element_children(parent)
			.filter(|&c| c != option && !dom.is_control(c))
			.find_map(|c| usable(dom.deep_text(c)));
		if let Some(text) = sibling_text {
			return text;
		}

		if let Some(grandparent) = dom.parents(parent).next() {
			let input = Matcher::Tag("input");
			let uncle_text = dom
				.element_children(grandparent)
				.filter(|&c| c != parent && !dom.is_control(c) && dom.deep_query_all(c, &input).is_empty())
				.find_map(|c| usable(dom.deep_text(c)));
			if let Some(text) = uncle_text {
				return text;
			}
		}

		return clean_label(&dom.deep_text(parent));
	}

	String::new()
}

fn prompt_in(text: &str) -> Option<String> {
	let caps = PROMPT_RE.captures(text)?;
	let prompt = normalize_ws(caps.get(1)?.as_str());
	(!prompt.is_empty()).then_some(prompt)
}

/// Prompt of the question the group belongs to, or [`UNKNOWN_QUESTION`]
pub fn extract_question_prompt(dom: &DomSnapshot, group: &QuestionGroup) -> String {
	let Some(first) = group.option(0) else {
		return UNKNOWN_QUESTION.to_string();
	};

	let found = dom.logical_ancestors(first.node).take(PROMPT_LOGICAL_HOPS).find_map(|a| {
		let text = dom.deep_text(a);
		if text.contains("Question") && text.contains("Select an Answer") { prompt_in(&text) } else { None }
	});
	if let Some(prompt) = found {
		return prompt;
	}

	dom.parents(first.node)
		.take(PROMPT_PARENT_HOPS)
		.find_map(|p| {
			let text = dom.text(p);
			let len = text.chars().count();
			if (PROMPT_BLOCK_MIN_CHARS..=PROMPT_BLOCK_MAX_CHARS).contains(&len) { prompt_in(&text) } else { None }
		})
		.unwrap_or_else(|| UNKNOWN_QUESTION.to_string())
}

#[cfg(test)]
mod tests {
	use serde_json::{Value, json};

	use super::*;
	use crate::Handle;

	fn doc(body: Vec<Value>) -> DomSnapshot {
		DomSnapshot::from_value(json!({ "tag": "#document", "children": [{ "tag": "body", "children": body }] })).unwrap()
	}

	fn radio(handle: u32, name: &str) -> Value {
		json!({ "tag": "input", "handle": handle, "attrs": { "type": "radio", "name": name } })
	}

	#[test]
	fn grouping_is_exact_regardless_of_discovery_order() {
		let dom = doc(vec![radio(1, "a"), radio(2, "b"), radio(3, "a"), radio(4, "c"), radio(5, "b")]);
		let groups = scan_groups(&dom);
		let keys: Vec<_> = groups.iter().map(|g| g.key.as_str()).collect();
		assert_eq!(keys, vec!["name:a", "name:b", "name:c"]);
		let a: Vec<u32> = groups[0].handles().iter().map(|h| h.0).collect();
		assert_eq!(a, vec![1, 3]);
		assert_eq!(groups.iter().map(QuestionGroup::len).sum::<usize>(), 5);
	}

	#[test]
	fn selector_chain_stops_at_first_hit() {
		let dom = doc(vec![
			json!({ "tag": "div", "handle": 9, "attrs": { "role": "radio" } }),
			radio(1, "q"),
			json!({ "tag": "span", "handle": 8, "attrs": { "class": "fake-radio" } }),
		]);
		let options = scan_options(&dom);
		assert_eq!(options.len(), 1);
		assert_eq!(options[0].handle, Handle(1));
	}

	#[test]
	fn labels_follow_the_fallback_chain() {
		let dom = doc(vec![
			json!({ "tag": "label", "children": [radio(1, "q"), { "text": "A. Paris is the capital" }] }),
			json!({ "tag": "label", "attrs": { "for": "opt2" }, "children": [{ "text": "B. Lyon" }] }),
			json!({ "tag": "input", "handle": 2, "attrs": { "type": "radio", "name": "q", "id": "opt2" } }),
			json!({ "tag": "div", "children": [radio(3, "q"), { "tag": "span", "children": [{ "text": "C. Marseille" }] }] }),
			json!({ "tag": "div", "children": [
				{ "tag": "div", "children": [radio(4, "q")] },
				{ "tag": "p", "children": [{ "text": "D. Toulouse" }] }
			]}),
		]);
		let labels = scan_groups(&dom)[0].labels();
		assert_eq!(labels, vec!["Paris is the capital", "Lyon", "Marseille", "Toulouse"]);
	}

	#[test]
	fn short_wrapping_label_defers_to_linked_label() {
		let dom = doc(vec![
			json!({ "tag": "label", "children": [
				{ "tag": "input", "handle": 1, "attrs": { "type": "radio", "name": "q", "id": "opt1" } },
				{ "text": "A." }
			]}),
			json!({ "tag": "label", "attrs": { "for": "opt1" }, "children": [{ "text": "Photosynthesis" }] }),
		]);
		let group = &scan_groups(&dom)[0];
		assert_eq!(group.labels(), vec!["Photosynthesis"]);
		let wrapping = associated_label(&dom, group.options[0].node).unwrap();
		assert_eq!(dom.text(wrapping), "A.");
	}

	#[test]
	fn prompt_between_markers_across_shadow_hosts() {
		let dom = doc(vec![json!({
			"tag": "question-card",
			"children": [{ "text": "Question 3 What colour is the sky? Select an Answer" }],
			"shadow": [{ "tag": "div", "children": [radio(1, "q"), radio(2, "q")] }]
		})]);
		let group = &scan_groups(&dom)[0];
		assert_eq!(extract_question_prompt(&dom, group), "What colour is the sky?");
	}

	#[test]
	fn prompt_falls_back_to_placeholder() {
		let dom = doc(vec![json!({ "tag": "div", "children": [radio(1, "q"), { "text": "nothing useful" }] })]);
		let group = &scan_groups(&dom)[0];
		assert_eq!(extract_question_prompt(&dom, group), UNKNOWN_QUESTION);
	}
}
