//! Snapshot of one execution context's DOM, open shadow trees included.
//!
//! The page-side snapshot script serializes the document into a [`RawNode`] tree. Here it gets flattened into an
//! arena so that upward walks (parents, shadow hosts) are as cheap as downward ones. Elements inside closed shadow
//! roots are simply absent, which every caller treats as "not found".

use std::collections::BTreeMap;

use color_eyre::{Result, eyre::eyre};
use serde::Deserialize;

use crate::Handle;

/// Index of a node inside one [`DomSnapshot`]. Meaningless across snapshots.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NodeId(usize);

#[derive(Clone, Debug, PartialEq)]
pub enum NodeKind {
	Document,
	Element { tag: String, attrs: BTreeMap<String, String> },
	ShadowRoot,
	Text(String),
}

#[derive(Clone, Debug)]
pub struct Node {
	pub kind: NodeKind,
	pub handle: Option<Handle>,
	/// Light-tree parent. `None` for the document and for shadow roots.
	pub parent: Option<NodeId>,
	/// Set on shadow roots only
	pub host: Option<NodeId>,
	pub children: Vec<NodeId>,
	pub shadow_root: Option<NodeId>,
	/// Rendered `(width, height)`. `None` when measuring failed page-side.
	pub size: Option<(f64, f64)>,
	pub checked: bool,
	pub disabled: bool,
}

/// Wire format produced by the page-side snapshot script
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RawNode {
	/// Lowercase tag name, `#document` for the root, absent for text nodes
	#[serde(default)]
	pub tag: Option<String>,
	#[serde(default)]
	pub text: Option<String>,
	#[serde(default)]
	pub handle: Option<Handle>,
	#[serde(default)]
	pub attrs: BTreeMap<String, String>,
	#[serde(default)]
	pub children: Vec<RawNode>,
	/// Children of an open shadow root attached to this element
	#[serde(default)]
	pub shadow: Option<Vec<RawNode>>,
	#[serde(default)]
	pub width: Option<f64>,
	#[serde(default)]
	pub height: Option<f64>,
	#[serde(default)]
	pub checked: bool,
	#[serde(default)]
	pub disabled: bool,
}

/// Element predicate, the subset of CSS selectors the automation needs
#[derive(Clone, Debug)]
pub enum Matcher {
	Tag(&'static str),
	Class(&'static str),
	/// Attribute equals value (ASCII case-insensitive)
	AttrEq(&'static str, &'static str),
	/// Attribute contains substring (ASCII case-insensitive)
	AttrContains(&'static str, &'static str),
	Any(Vec<Matcher>),
	All(Vec<Matcher>),
}

impl Matcher {
	pub fn matches(&self, dom: &DomSnapshot, id: NodeId) -> bool {
		if !dom.is_element(id) {
			return false;
		}
		match self {
			Matcher::Tag(tag) => dom.tag(id).is_some_and(|t| t.eq_ignore_ascii_case(tag)),
			Matcher::Class(class) => dom.has_class(id, class),
			Matcher::AttrEq(name, value) => dom.attr(id, name).is_some_and(|v| v.eq_ignore_ascii_case(value)),
			Matcher::AttrContains(name, needle) => dom.attr(id, name).is_some_and(|v| v.to_ascii_lowercase().contains(&needle.to_ascii_lowercase())),
			Matcher::Any(ms) => ms.iter().any(|m| m.matches(dom, id)),
			Matcher::All(ms) => ms.iter().all(|m| m.matches(dom, id)),
		}
	}

	/// Native form controls
	pub fn control() -> Self {
		Matcher::Any(vec![Matcher::Tag("input"), Matcher::Tag("select"), Matcher::Tag("textarea"), Matcher::Tag("button")])
	}

	/// Anything a user could press
	pub fn clickable() -> Self {
		Matcher::Any(vec![
			Matcher::Tag("button"),
			Matcher::Tag("a"),
			Matcher::AttrEq("role", "button"),
			Matcher::All(vec![Matcher::Tag("input"), Matcher::AttrEq("type", "button")]),
			Matcher::All(vec![Matcher::Tag("input"), Matcher::AttrEq("type", "submit")]),
		])
	}
}

#[derive(Clone, Debug)]
pub struct DomSnapshot {
	nodes: Vec<Node>,
}

impl DomSnapshot {
	pub fn from_json(json: &str) -> Result<Self> {
		let raw: RawNode = serde_json::from_str(json).map_err(|e| eyre!("Failed to parse DOM snapshot: {}", e))?;
		Ok(Self::from_raw(raw))
	}

	pub fn from_value(value: serde_json::Value) -> Result<Self> {
		let raw: RawNode = serde_json::from_value(value).map_err(|e| eyre!("Failed to parse DOM snapshot: {}", e))?;
		Ok(Self::from_raw(raw))
	}

	pub fn from_raw(raw: RawNode) -> Self {
		let mut dom = Self { nodes: Vec::new() };
		dom.push(raw, None, None);
		dom
	}

	fn push(&mut self, raw: RawNode, parent: Option<NodeId>, host: Option<NodeId>) -> NodeId {
		let kind = match (raw.tag, raw.text) {
			(Some(tag), _) if tag == "#document" => NodeKind::Document,
			(Some(tag), _) => NodeKind::Element {
				tag: tag.to_ascii_lowercase(),
				attrs: raw.attrs,
			},
			(None, Some(text)) => NodeKind::Text(text),
			(None, None) => NodeKind::Text(String::new()),
		};
		let size = match (raw.width, raw.height) {
			(Some(w), Some(h)) => Some((w, h)),
			_ => None,
		};
		let id = NodeId(self.nodes.len());
		self.nodes.push(Node {
			kind,
			handle: raw.handle,
			parent,
			host,
			children: Vec::new(),
			shadow_root: None,
			size,
			checked: raw.checked,
			disabled: raw.disabled,
		});

		let children: Vec<NodeId> = raw.children.into_iter().map(|c| self.push(c, Some(id), None)).collect();
		self.nodes[id.0].children = children;

		if let Some(shadow_children) = raw.shadow {
			let root = NodeId(self.nodes.len());
			self.nodes.push(Node {
				kind: NodeKind::ShadowRoot,
				handle: None,
				parent: None,
				host: Some(id),
				children: Vec::new(),
				shadow_root: None,
				size: None,
				checked: false,
				disabled: false,
			});
			let children: Vec<NodeId> = shadow_children.into_iter().map(|c| self.push(c, Some(root), None)).collect();
			self.nodes[root.0].children = children;
			self.nodes[id.0].shadow_root = Some(root);
		}
		id
	}

	pub fn root(&self) -> NodeId {
		NodeId(0)
	}

	pub fn len(&self) -> usize {
		self.nodes.len()
	}

	pub fn is_empty(&self) -> bool {
		self.nodes.is_empty()
	}

	pub fn node(&self, id: NodeId) -> &Node {
		&self.nodes[id.0]
	}

	pub fn handle(&self, id: NodeId) -> Option<Handle> {
		self.node(id).handle
	}

	/// Find the node carrying a page-side handle
	pub fn by_handle(&self, handle: Handle) -> Option<NodeId> {
		self.nodes.iter().position(|n| n.handle == Some(handle)).map(NodeId)
	}

	pub fn is_element(&self, id: NodeId) -> bool {
		matches!(self.node(id).kind, NodeKind::Element { .. })
	}

	pub fn tag(&self, id: NodeId) -> Option<&str> {
		match &self.node(id).kind {
			NodeKind::Element { tag, .. } => Some(tag),
			_ => None,
		}
	}

	pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
		match &self.node(id).kind {
			NodeKind::Element { attrs, .. } => attrs.get(name).map(String::as_str),
			_ => None,
		}
	}

	pub fn has_class(&self, id: NodeId, class: &str) -> bool {
		self.attr(id, "class").is_some_and(|c| c.split_whitespace().any(|c| c == class))
	}

	pub fn is_control(&self, id: NodeId) -> bool {
		Matcher::control().matches(self, id)
	}

	/// Non-zero rendered size. A node whose size could not be measured counts as visible.
	pub fn is_visible(&self, id: NodeId) -> bool {
		match self.node(id).size {
			Some((w, h)) => w > 0.0 && h > 0.0,
			None => true,
		}
	}

	/// Light-tree text, like `textContent`: shadow contents are not included
	pub fn text(&self, id: NodeId) -> String {
		let mut parts = Vec::new();
		self.collect_text(id, false, &mut parts);
		normalize_ws(&parts.join(" "))
	}

	/// Text including every open shadow tree below `id`
	pub fn deep_text(&self, id: NodeId) -> String {
		let mut parts = Vec::new();
		self.collect_text(id, true, &mut parts);
		normalize_ws(&parts.join(" "))
	}

	fn collect_text<'a>(&'a self, id: NodeId, deep: bool, out: &mut Vec<&'a str>) {
		let node = self.node(id);
		if let NodeKind::Text(t) = &node.kind {
			out.push(t);
			return;
		}
		if deep && let Some(root) = node.shadow_root {
			self.collect_text(root, deep, out);
		}
		for &child in &node.children {
			self.collect_text(child, deep, out);
		}
	}

	/// Visible wording of a control: its text, else `aria-label`, `value` or `title`
	pub fn control_text(&self, id: NodeId) -> String {
		let text = self.deep_text(id);
		if !text.is_empty() {
			return text;
		}
		["aria-label", "value", "title"]
			.iter()
			.find_map(|a| self.attr(id, a).map(str::trim).filter(|v| !v.is_empty()))
			.map(normalize_ws)
			.unwrap_or_default()
	}

	pub fn element_children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
		self.node(id).children.iter().copied().filter(|&c| self.is_element(c))
	}

	/// Next node (of any kind) under the same parent
	pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
		let parent = self.node(id).parent?;
		let siblings = &self.node(parent).children;
		let pos = siblings.iter().position(|&c| c == id)?;
		siblings.get(pos + 1).copied()
	}

	/// The document or shadow root this node lives in
	pub fn tree_root(&self, mut id: NodeId) -> NodeId {
		while let Some(parent) = self.node(id).parent {
			id = parent;
		}
		id
	}

	/// Element ancestors, stopping at a shadow boundary
	pub fn parents(&self, id: NodeId) -> Ancestors<'_> {
		Ancestors { dom: self, current: id, cross_shadow: false }
	}

	/// Element ancestors, continuing from a shadow root to its host
	pub fn logical_ancestors(&self, id: NodeId) -> Ancestors<'_> {
		Ancestors { dom: self, current: id, cross_shadow: true }
	}

	/// `id` itself or its nearest light-tree ancestor matching `m`
	pub fn closest(&self, id: NodeId, m: &Matcher) -> Option<NodeId> {
		std::iter::once(id).chain(self.parents(id)).find(|&n| m.matches(self, n))
	}

	/// Light-tree descendants of `start` (excluding it), in document order
	pub fn descendants(&self, start: NodeId) -> Vec<NodeId> {
		let mut out = Vec::new();
		let mut stack: Vec<NodeId> = self.node(start).children.iter().rev().copied().collect();
		while let Some(id) = stack.pop() {
			out.push(id);
			stack.extend(self.node(id).children.iter().rev().copied());
		}
		out
	}

	/// Like `querySelectorAll`: light-tree only
	pub fn query_all(&self, start: NodeId, m: &Matcher) -> Vec<NodeId> {
		self.descendants(start).into_iter().filter(|&id| m.matches(self, id)).collect()
	}

	/// All matches below `start`, recursing into every open shadow tree.
	///
	/// Light-tree matches come first in document order, then the contents of each shadow host in the order the hosts
	/// were encountered.
	pub fn deep_query_all(&self, start: NodeId, m: &Matcher) -> Vec<NodeId> {
		let descendants = self.descendants(start);
		let mut out: Vec<NodeId> = descendants.iter().copied().filter(|&id| m.matches(self, id)).collect();
		let hosts = std::iter::once(start).chain(descendants);
		for host in hosts {
			if let Some(root) = self.node(host).shadow_root {
				out.extend(self.deep_query_all(root, m));
			}
		}
		out
	}

	/// Deep matches whose control text contains `needle`, case-insensitively
	pub fn deep_find_by_text(&self, start: NodeId, m: &Matcher, needle: &str) -> Vec<NodeId> {
		let needle = needle.to_lowercase();
		self.deep_query_all(start, m)
			.into_iter()
			.filter(|&id| self.control_text(id).to_lowercase().contains(&needle))
			.collect()
	}
}

/// Upward walk over element ancestors. See [`DomSnapshot::logical_ancestors`].
pub struct Ancestors<'a> {
	dom: &'a DomSnapshot,
	current: NodeId,
	cross_shadow: bool,
}

impl Iterator for Ancestors<'_> {
	type Item = NodeId;

	fn next(&mut self) -> Option<NodeId> {
		let node = self.dom.node(self.current);
		let next = match node.parent {
			Some(parent) => match self.dom.node(parent).kind {
				NodeKind::Element { .. } => Some(parent),
				NodeKind::ShadowRoot if self.cross_shadow => self.dom.node(parent).host,
				_ => None,
			},
			None if self.cross_shadow => node.host,
			None => None,
		}?;
		self.current = next;
		Some(next)
	}
}

/// Collapse runs of whitespace into single spaces and trim
pub fn normalize_ws(s: &str) -> String {
	s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn sample() -> DomSnapshot {
		DomSnapshot::from_value(json!({
			"tag": "#document",
			"children": [{
				"tag": "body",
				"children": [
					{ "tag": "p", "handle": 1, "children": [{ "text": "Intro" }] },
					{
						"tag": "quiz-card",
						"handle": 2,
						"children": [{ "text": "light" }],
						"shadow": [
							{ "tag": "div", "attrs": { "class": "inner box" }, "children": [
								{ "tag": "button", "handle": 3, "width": 0.0, "height": 10.0, "children": [{ "text": "Check Answer" }] }
							]},
							{ "tag": "nested-el", "shadow": [
								{ "tag": "button", "handle": 4, "children": [{ "text": "Deep" }] }
							]}
						]
					},
					{ "tag": "button", "handle": 5, "attrs": { "aria-label": "Close" } }
				]
			}]
		}))
		.unwrap()
	}

	#[test]
	fn deep_query_reaches_nested_shadow_trees_after_light_matches() {
		let dom = sample();
		let buttons = dom.deep_query_all(dom.root(), &Matcher::Tag("button"));
		let handles: Vec<u32> = buttons.iter().filter_map(|&b| dom.handle(b)).map(|h| h.0).collect();
		assert_eq!(handles, vec![5, 3, 4]);

		let light = dom.query_all(dom.root(), &Matcher::Tag("button"));
		assert_eq!(light.len(), 1);
	}

	#[test]
	fn logical_ancestors_cross_shadow_hosts_but_parents_do_not() {
		let dom = sample();
		let deep = dom.by_handle(Handle(4)).unwrap();
		let crossing: Vec<_> = dom.logical_ancestors(deep).filter_map(|a| dom.tag(a).map(str::to_owned)).collect();
		assert_eq!(crossing, vec!["nested-el", "quiz-card", "body"]);
		assert_eq!(dom.parents(deep).count(), 0);
	}

	#[test]
	fn text_excludes_shadow_but_deep_text_includes_it() {
		let dom = sample();
		let card = dom.by_handle(Handle(2)).unwrap();
		assert_eq!(dom.text(card), "light");
		assert_eq!(dom.deep_text(card), "Check Answer Deep light");
	}

	#[test]
	fn visibility_and_control_text() {
		let dom = sample();
		let hidden = dom.by_handle(Handle(3)).unwrap();
		let unmeasured = dom.by_handle(Handle(5)).unwrap();
		assert!(!dom.is_visible(hidden));
		assert!(dom.is_visible(unmeasured));
		assert_eq!(dom.control_text(unmeasured), "Close");
		assert_eq!(dom.deep_find_by_text(dom.root(), &Matcher::clickable(), "check answer").len(), 1);
	}
}
