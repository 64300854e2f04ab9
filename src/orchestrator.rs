//! One solving pass over every question group of a context

use std::{cell::Cell, fmt};

use v_utils::{elog, log};

use crate::{
	config::Timings,
	context::Frame,
	coordinator::Bus,
	extract::scan_groups,
	llm::Answerer,
	solver::{SolveOutcome, Solver},
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunState {
	Idle,
	Running,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PassReport {
	pub groups: usize,
	pub solved: usize,
	pub already_complete: usize,
	pub exhausted: usize,
	pub vanished: usize,
	pub navigation_requested: bool,
}

impl fmt::Display for PassReport {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"{} question(s): {} solved, {} already complete, {} unsolved",
			self.groups, self.solved, self.already_complete, self.exhausted
		)?;
		if self.vanished > 0 {
			write!(f, ", {} disappeared", self.vanished)?;
		}
		Ok(())
	}
}

/// Per-context driver. Holds the run state that keeps two passes from overlapping in one context.
#[derive(Debug)]
pub struct Orchestrator {
	state: Cell<RunState>,
}

impl Default for Orchestrator {
	fn default() -> Self {
		Self::new()
	}
}

/// Puts the orchestrator back to `Idle` however the pass ends
struct Running<'a>(&'a Cell<RunState>);

impl Drop for Running<'_> {
	fn drop(&mut self) {
		self.0.set(RunState::Idle);
	}
}

impl Orchestrator {
	pub fn new() -> Self {
		Self { state: Cell::new(RunState::Idle) }
	}

	pub fn state(&self) -> RunState {
		self.state.get()
	}

	/// Run a pass unless one is already running in this context, in which case this is a no-op returning `None`.
	///
	/// `has_nested` tells the top-level context whether other contexts exist; with no questions of its own, it only
	/// moves the page along when it is alone.
	pub async fn start<F: Frame, A: Answerer>(&self, frame: &F, answerer: &A, bus: &Bus, timings: &Timings, has_nested: bool) -> Option<PassReport> {
		if self.state.get() == RunState::Running {
			tracing::debug!("[{}] pass already running, ignoring start", frame.label());
			return None;
		}
		self.state.set(RunState::Running);
		let _running = Running(&self.state);

		let report = self.run_pass(frame, answerer, bus, timings, has_nested).await;
		log!("[{}] Pass done: {report}", frame.label());
		Some(report)
	}

	async fn run_pass<F: Frame, A: Answerer>(&self, frame: &F, answerer: &A, bus: &Bus, timings: &Timings, has_nested: bool) -> PassReport {
		let mut report = PassReport::default();
		tokio::time::sleep(Timings::ms(timings.initial_settle)).await;

		let dom = match frame.snapshot().await {
			Ok(dom) => dom,
			Err(e) => {
				elog!("[{}] Could not read the page: {e}", frame.label());
				return report;
			}
		};
		let keys: Vec<String> = scan_groups(&dom).into_iter().map(|g| g.key).collect();
		drop(dom);
		report.groups = keys.len();

		if keys.is_empty() {
			log!("[{}] No questions found.", frame.label());
			if frame.is_top() && !has_nested {
				tokio::time::sleep(Timings::ms(timings.post_pass_settle)).await;
				bus.navigate_next();
				report.navigation_requested = true;
			}
			return report;
		}

		let solver = Solver::new(frame, answerer, bus, timings);
		for (i, key) in keys.iter().enumerate() {
			log!("--- Question {}/{} ---", i + 1, keys.len());
			match solver.solve(key).await {
				SolveOutcome::AlreadyComplete => {
					log!("Already complete, skipping.");
					report.already_complete += 1;
				}
				SolveOutcome::Solved { index, attempts } => {
					log!("Solved with option {} after {attempts} attempt(s).", index + 1);
					report.solved += 1;
				}
				SolveOutcome::Exhausted { .. } => report.exhausted += 1,
				SolveOutcome::Vanished => {
					tracing::warn!("[{}] group {key} disappeared before it could be solved", frame.label());
					report.vanished += 1;
				}
			}
		}

		tokio::time::sleep(Timings::ms(timings.post_pass_settle)).await;
		bus.navigate_next();
		report.navigation_requested = true;
		report
	}
}
