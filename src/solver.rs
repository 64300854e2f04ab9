//! Answer-and-verify loop for a single question group

use v_utils::{elog, log};

use crate::{
	ModalOutcome, QuestionGroup, QuestionRecord,
	completion,
	config::Timings,
	context::Frame,
	coordinator::Bus,
	dom::{DomSnapshot, Matcher, NodeId},
	extract::{extract_question_prompt, scan_groups},
	interact::{Interaction, plan_select},
	llm::Answerer,
	modal,
};

/// Shadow hosts walked outward when looking for the check button next to the options
const CHECK_SCOPE_HOPS: usize = 10;
const CHECK_BUTTON_TEXT: &str = "check answer";

/// Positions are indices into [`QuestionRecord::trial_order`]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SolveState {
	Idle,
	Querying,
	Selecting(usize),
	Checking(usize),
	AwaitingOutcome(usize),
	Retrying(usize),
	Success(usize),
	Exhausted,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SolveOutcome {
	/// Completion oracle said so, nothing was touched
	AlreadyComplete,
	Solved { index: usize, attempts: usize },
	/// Every option was tried without a confirmed correct answer
	Exhausted { attempts: usize },
	/// The group was no longer on the page
	Vanished,
}

/// Suggested index first, then every other index in ascending order
pub fn trial_order(suggested: usize, len: usize) -> Vec<usize> {
	if len == 0 {
		return Vec::new();
	}
	let first = if suggested < len { suggested } else { 0 };
	std::iter::once(first).chain((0..len).filter(|&i| i != first)).collect()
}

/// "Check Answer" control closest to the group: first inside the shadow trees enclosing its options, walking out
/// host by host, then anywhere in the document.
pub fn find_check_button(dom: &DomSnapshot, group: Option<&QuestionGroup>) -> Option<NodeId> {
	let clickable = Matcher::clickable();
	if let Some(first) = group.and_then(|g| g.option(0)) {
		let mut scope = dom.tree_root(first.node);
		for _ in 0..CHECK_SCOPE_HOPS {
			if let Some(&button) = dom.deep_find_by_text(scope, &clickable, CHECK_BUTTON_TEXT).first() {
				return Some(button);
			}
			match dom.node(scope).host {
				Some(host) => scope = dom.tree_root(host),
				None => break,
			}
		}
	}
	dom.deep_find_by_text(dom.root(), &clickable, CHECK_BUTTON_TEXT).into_iter().next()
}

enum Selection {
	Selected,
	Failed,
	/// The group turned complete since the last trial, e.g. after a popup nobody could read
	GroupComplete,
}

pub struct Solver<'a, F, A> {
	frame: &'a F,
	answerer: &'a A,
	bus: &'a Bus,
	timings: &'a Timings,
}

impl<'a, F: Frame, A: Answerer> Solver<'a, F, A> {
	pub fn new(frame: &'a F, answerer: &'a A, bus: &'a Bus, timings: &'a Timings) -> Self {
		Self { frame, answerer, bus, timings }
	}

	/// Re-read the page and find the group again; options may have been re-rendered since the last scan
	async fn fresh_group(&self, key: &str) -> Option<(DomSnapshot, QuestionGroup)> {
		let dom = match self.frame.snapshot().await {
			Ok(dom) => dom,
			Err(e) => {
				tracing::warn!("[{}] snapshot failed: {e}", self.frame.label());
				return None;
			}
		};
		let group = scan_groups(&dom).into_iter().find(|g| g.key == key)?;
		Some((dom, group))
	}

	async fn perform(&self, action: &Interaction) -> bool {
		match self.frame.perform(action).await {
			Ok(done) => done,
			Err(e) => {
				tracing::warn!("[{}] interaction on {} failed: {e}", self.frame.label(), action.target());
				false
			}
		}
	}

	async fn completed(&self, key: &str) -> bool {
		self.fresh_group(key).await.is_some_and(|(dom, group)| completion::is_complete(&dom, &group))
	}

	async fn select(&self, key: &str, idx: usize) -> Selection {
		let Some((dom, group)) = self.fresh_group(key).await else {
			return Selection::Failed;
		};
		if completion::is_complete(&dom, &group) {
			return Selection::GroupComplete;
		}
		match plan_select(&dom, &group, idx) {
			Some(action) if self.perform(&action).await => Selection::Selected,
			_ => Selection::Failed,
		}
	}

	async fn check(&self, key: &str) -> bool {
		let dom = match self.frame.snapshot().await {
			Ok(dom) => dom,
			Err(e) => {
				tracing::warn!("[{}] snapshot failed: {e}", self.frame.label());
				return false;
			}
		};
		let group = scan_groups(&dom).into_iter().find(|g| g.key == key);
		let Some(target) = find_check_button(&dom, group.as_ref()).and_then(|b| dom.handle(b)) else {
			elog!("[{}] No \"Check Answer\" button found", self.frame.label());
			return false;
		};
		self.perform(&Interaction::Click { target }).await
	}

	/// Drive one question to a confirmed correct answer, or through every option
	pub async fn solve(&self, key: &str) -> SolveOutcome {
		let Some((dom, group)) = self.fresh_group(key).await else {
			return SolveOutcome::Vanished;
		};
		if group.is_empty() {
			return SolveOutcome::Vanished;
		}
		if completion::is_complete(&dom, &group) {
			tracing::debug!("[{}] group {key} already complete", self.frame.label());
			return SolveOutcome::AlreadyComplete;
		}
		let mut record = QuestionRecord::new(extract_question_prompt(&dom, &group), group.labels());
		drop(dom);

		let mut attempts = 0;
		let mut state = SolveState::Idle;
		loop {
			tracing::debug!("[{}] {key}: {state:?}", self.frame.label());
			state = match state {
				SolveState::Idle => SolveState::Querying,
				SolveState::Querying => {
					let idx = match self.answerer.suggest(&record).await {
						Ok(s) => {
							tracing::debug!("AI answer: {}", s.raw);
							s.index
						}
						Err(e) => {
							elog!("AI request failed, defaulting to the first option: {e}");
							0
						}
					};
					record.adopt_suggestion(idx);
					log!("{record}");
					SolveState::Selecting(0)
				}
				SolveState::Selecting(pos) => {
					let idx = record.trial_order[pos];
					match self.select(key, idx).await {
						Selection::Selected => {
							attempts += 1;
							tokio::time::sleep(Timings::ms(self.timings.select_settle)).await;
							SolveState::Checking(pos)
						}
						Selection::Failed => {
							attempts += 1;
							elog!("Could not select option {}", idx + 1);
							SolveState::Retrying(pos)
						}
						Selection::GroupComplete if pos == 0 => return SolveOutcome::AlreadyComplete,
						Selection::GroupComplete => {
							log!("Question shows as complete, taking option {} as the answer.", record.trial_order[pos - 1] + 1);
							SolveState::Success(pos - 1)
						}
					}
				}
				SolveState::Checking(pos) =>
					if self.check(key).await {
						SolveState::AwaitingOutcome(pos)
					} else {
						SolveState::Retrying(pos)
					},
				SolveState::AwaitingOutcome(pos) => {
					let outcome = modal::resolve(self.frame, self.bus, self.timings).await;
					log!("Option {}: {outcome}", record.trial_order[pos] + 1);
					match outcome {
						ModalOutcome::Correct => SolveState::Success(pos),
						ModalOutcome::Wrong | ModalOutcome::Unknown => {
							tokio::time::sleep(Timings::ms(self.timings.retry_settle)).await;
							SolveState::Retrying(pos)
						}
					}
				}
				SolveState::Retrying(pos) =>
					if pos + 1 < record.trial_order.len() {
						SolveState::Selecting(pos + 1)
					} else if self.completed(key).await {
						log!("Question shows as complete, taking option {} as the answer.", record.trial_order[pos] + 1);
						SolveState::Success(pos)
					} else {
						SolveState::Exhausted
					},
				SolveState::Success(pos) => {
					return SolveOutcome::Solved {
						index: record.trial_order[pos],
						attempts,
					};
				}
				SolveState::Exhausted => {
					elog!("Tried all {} options without a confirmed correct answer, leaving question unsolved", record.options.len());
					return SolveOutcome::Exhausted { attempts };
				}
			};
		}
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::Handle;

	#[test]
	fn trial_order_starts_with_suggestion_and_covers_everything_once() {
		assert_eq!(trial_order(2, 4), vec![2, 0, 1, 3]);
		assert_eq!(trial_order(0, 3), vec![0, 1, 2]);
		assert_eq!(trial_order(9, 3), vec![0, 1, 2]);
		assert!(trial_order(0, 0).is_empty());

		for len in 1..8 {
			for k in 0..len {
				let mut order = trial_order(k, len);
				assert_eq!(order[0], k);
				order.sort_unstable();
				assert_eq!(order, (0..len).collect::<Vec<_>>());
			}
		}
	}

	#[test]
	fn check_button_prefers_the_options_shadow_tree() {
		let dom = DomSnapshot::from_value(json!({ "tag": "#document", "children": [
			{ "tag": "button", "handle": 1, "children": [{ "text": "Check Answer" }] },
			{ "tag": "quiz-q", "shadow": [
				{ "tag": "input", "handle": 2, "attrs": { "type": "radio", "name": "q" } },
				{ "tag": "button", "handle": 3, "children": [{ "text": "Check answer" }] }
			]}
		]}))
		.unwrap();
		let group = scan_groups(&dom).into_iter().next();
		let button = find_check_button(&dom, group.as_ref()).unwrap();
		assert_eq!(dom.handle(button), Some(Handle(3)));

		let unscoped = find_check_button(&dom, None).unwrap();
		assert_eq!(dom.handle(unscoped), Some(Handle(1)));
	}
}
