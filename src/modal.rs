//! Feedback popup shown after "Check Answer": classify it, dismiss it

use std::sync::LazyLock;

use regex::Regex;

use crate::{
	ModalOutcome,
	config::Timings,
	context::Frame,
	coordinator::Bus,
	dom::{DomSnapshot, Matcher, NodeId},
	extract::option_selectors,
	interact::Interaction,
};

static RETRY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\b(try again|retry)\b").expect("static regex"));
static DONE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\b(finish|ok|done|continue|got it)\b").expect("static regex"));
static CLOSE_LABEL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\b(close|dismiss)\b").expect("static regex"));

/// Classes the target UI puts on its wordless feedback close button
pub const FEEDBACK_CLOSE_CLASSES: &[&str] = &["feedback-close", "feedback__close", "modal-feedback-close"];

/// Visible pressable controls, plus aria-labelled elements that are not answer options
fn candidates(dom: &DomSnapshot) -> Vec<NodeId> {
	let clickable = Matcher::clickable();
	let option = Matcher::Any(option_selectors());
	let m = Matcher::Any(vec![clickable.clone(), Matcher::AttrContains("aria-label", "")]);
	dom.deep_query_all(dom.root(), &m)
		.into_iter()
		.filter(|&n| dom.is_visible(n) && (clickable.matches(dom, n) || !option.matches(dom, n)))
		.collect()
}

/// Decide what the visible popup controls say, and which one to press to dismiss it.
///
/// Retry wording wins over completion wording; a wordless structural close button, then a close/dismiss
/// accessibility label, count as success.
pub fn classify(dom: &DomSnapshot) -> Option<(ModalOutcome, NodeId)> {
	let visible = candidates(dom);
	let text_of = |n: NodeId| dom.control_text(n);

	if let Some(&n) = visible.iter().find(|&&n| RETRY_RE.is_match(&text_of(n))) {
		return Some((ModalOutcome::Wrong, n));
	}
	if let Some(&n) = visible.iter().find(|&&n| DONE_RE.is_match(&text_of(n))) {
		return Some((ModalOutcome::Correct, n));
	}
	// assumes a wordless close only ever follows a correct answer
	if let Some(&n) = visible.iter().find(|&&n| FEEDBACK_CLOSE_CLASSES.iter().any(|c| dom.has_class(n, c))) {
		return Some((ModalOutcome::Correct, n));
	}
	if let Some(&n) = visible.iter().find(|&&n| dom.attr(n, "aria-label").is_some_and(|l| CLOSE_LABEL_RE.is_match(l))) {
		return Some((ModalOutcome::Correct, n));
	}
	None
}

/// Classify and dismiss the popup in this context only. `None` if nothing recognizable is visible here.
pub async fn dismiss_local<F: Frame>(frame: &F, timings: &Timings) -> Option<ModalOutcome> {
	let dom = match frame.snapshot().await {
		Ok(dom) => dom,
		Err(e) => {
			tracing::warn!("[{}] snapshot failed while looking for feedback: {e}", frame.label());
			return None;
		}
	};
	let (outcome, node) = classify(&dom)?;
	let target = dom.handle(node)?;
	tracing::debug!("[{}] feedback {outcome} via \"{}\"", frame.label(), dom.control_text(node));

	if let Err(e) = frame.perform(&Interaction::Click { target }).await {
		tracing::warn!("[{}] failed to dismiss feedback: {e}", frame.label());
	}
	tokio::time::sleep(Timings::ms(timings.dismiss_settle)).await;
	Some(outcome)
}

/// Wait for the popup, then resolve it here or, from a nested context, through the top-level one
pub async fn resolve<F: Frame>(frame: &F, bus: &Bus, timings: &Timings) -> ModalOutcome {
	tokio::time::sleep(Timings::ms(timings.modal_wait)).await;

	if let Some(outcome) = dismiss_local(frame, timings).await {
		return outcome;
	}
	if frame.is_top() {
		return ModalOutcome::Unknown;
	}
	tracing::debug!("[{}] no feedback here, asking the top-level context", frame.label());
	bus.resolve_modal(Timings::ms(timings.modal_relay_timeout)).await
}

#[cfg(test)]
mod tests {
	use serde_json::{Value, json};

	use super::*;
	use crate::Handle;

	fn button(handle: u32, text: &str, visible: bool) -> Value {
		let size = if visible { 40.0 } else { 0.0 };
		json!({ "tag": "button", "handle": handle, "width": size, "height": size, "children": [{ "text": text }] })
	}

	fn popup(children: Vec<Value>) -> DomSnapshot {
		DomSnapshot::from_value(json!({ "tag": "#document", "children": [{ "tag": "feedback-modal", "shadow": children }] })).unwrap()
	}

	fn outcome(dom: &DomSnapshot) -> Option<(ModalOutcome, Option<Handle>)> {
		classify(dom).map(|(o, n)| (o, dom.handle(n)))
	}

	#[test]
	fn visible_try_again_beats_hidden_finish() {
		let dom = popup(vec![button(1, "Finish", false), button(2, "Try Again", true)]);
		assert_eq!(outcome(&dom), Some((ModalOutcome::Wrong, Some(Handle(2)))));
	}

	#[test]
	fn visible_finish_beats_hidden_try_again() {
		let dom = popup(vec![button(1, "Try Again", false), button(2, "Finish", true)]);
		assert_eq!(outcome(&dom), Some((ModalOutcome::Correct, Some(Handle(2)))));
	}

	#[test]
	fn wordless_close_controls_count_as_correct() {
		let by_class = popup(vec![json!({ "tag": "button", "handle": 3, "attrs": { "class": "feedback-close" } })]);
		assert_eq!(outcome(&by_class), Some((ModalOutcome::Correct, Some(Handle(3)))));

		let by_label = popup(vec![json!({ "tag": "span", "handle": 4, "attrs": { "aria-label": "Dismiss dialog" } })]);
		assert_eq!(outcome(&by_label), Some((ModalOutcome::Correct, Some(Handle(4)))));
	}

	#[test]
	fn aria_labelled_options_are_not_popup_controls() {
		let dom = popup(vec![
			json!({ "tag": "div", "handle": 5, "attrs": { "role": "radio", "aria-label": "OK, that is done" } }),
			json!({ "tag": "input", "handle": 6, "attrs": { "type": "radio", "aria-label": "Continue the reaction" } }),
		]);
		assert_eq!(outcome(&dom), None);

		let with_close = popup(vec![
			json!({ "tag": "div", "handle": 5, "attrs": { "role": "radio", "aria-label": "OK, that is done" } }),
			json!({ "tag": "span", "handle": 7, "attrs": { "aria-label": "Close feedback" } }),
		]);
		assert_eq!(outcome(&with_close), Some((ModalOutcome::Correct, Some(Handle(7)))));
	}

	#[test]
	fn unrelated_controls_yield_nothing() {
		let dom = popup(vec![button(1, "Bookmark", true), button(2, "Try Again", false)]);
		assert_eq!(outcome(&dom), None);
	}
}
