//! Cross-context coordination: the message bus, page navigation, and "start solving" over every context

use std::{
	cell::{Cell, RefCell},
	collections::HashMap,
	rc::Rc,
	sync::LazyLock,
	time::Duration,
};

use color_eyre::Result;
use regex::Regex;
use tokio::sync::{Notify, broadcast, mpsc, oneshot};
use v_utils::{elog, log};

use crate::{
	ModalOutcome,
	config::Timings,
	context::{Frame, FrameSource},
	dom::{DomSnapshot, Matcher, NodeId},
	interact::Interaction,
	llm::Answerer,
	modal,
	orchestrator::Orchestrator,
	store::KvStore,
};

static NEXT_LINK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*Next:").expect("static regex"));
/// Class of the vendor's "next page" control
pub const NEXT_PAGE_CLASS: &str = "next-page-link";

/// Fire-and-forget messages delivered to every context
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Broadcast {
	StartSolving,
}

/// Requests only the top-level context acts on
#[derive(Debug)]
pub enum Request {
	NavigateNext,
	ResolveModal { reply: oneshot::Sender<ModalOutcome> },
}

/// Handle every context holds to talk to the others.
///
/// Delivery is best-effort: a broadcast nobody listens to is dropped, a request nobody answers resolves to a
/// conservative default. Nothing here ever blocks on all recipients acknowledging.
#[derive(Clone, Debug)]
pub struct Bus {
	broadcast: broadcast::Sender<Broadcast>,
	requests: mpsc::UnboundedSender<Request>,
}

/// Receiving ends, owned by whoever serves the top-level context
#[derive(Debug)]
pub struct BusReceivers {
	pub broadcast: broadcast::Receiver<Broadcast>,
	pub requests: mpsc::UnboundedReceiver<Request>,
}

impl Bus {
	pub fn new() -> (Self, BusReceivers) {
		let (broadcast, broadcast_rx) = broadcast::channel(16);
		let (requests, requests_rx) = mpsc::unbounded_channel();
		(Self { broadcast, requests }, BusReceivers {
			broadcast: broadcast_rx,
			requests: requests_rx,
		})
	}

	pub fn subscribe(&self) -> broadcast::Receiver<Broadcast> {
		self.broadcast.subscribe()
	}

	pub fn start_solving(&self) {
		if self.broadcast.send(Broadcast::StartSolving).is_err() {
			tracing::debug!("start-solving broadcast had no listeners");
		}
	}

	pub fn navigate_next(&self) {
		if self.requests.send(Request::NavigateNext).is_err() {
			elog!("Navigation request dropped: top-level context is gone");
		}
	}

	/// Ask the top-level context to resolve the feedback popup. `Unknown` on any transport failure or timeout.
	pub async fn resolve_modal(&self, timeout: Duration) -> ModalOutcome {
		let (reply, rx) = oneshot::channel();
		if self.requests.send(Request::ResolveModal { reply }).is_err() {
			return ModalOutcome::Unknown;
		}
		match tokio::time::timeout(timeout, rx).await {
			Ok(Ok(outcome)) => outcome,
			Ok(Err(_)) => ModalOutcome::Unknown,
			Err(_) => {
				tracing::warn!("modal resolution request timed out");
				ModalOutcome::Unknown
			}
		}
	}
}

/// Which signal ended the wait after activating the next-page control
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Transition {
	/// An embedded iframe got a new `src`
	FrameChanged,
	/// Nothing observable happened in time; assume the page moved on
	TimedOut,
}

/// The control leading to the next page: the vendor class, else a link or button reading `Next: ...`
pub fn find_next_control(dom: &DomSnapshot) -> Option<NodeId> {
	if let Some(&n) = dom.deep_query_all(dom.root(), &Matcher::Class(NEXT_PAGE_CLASS)).first() {
		return Some(n);
	}
	dom.deep_query_all(dom.root(), &Matcher::clickable())
		.into_iter()
		.find(|&n| NEXT_LINK_RE.is_match(&dom.control_text(n)))
}

/// Poll the embedded iframes' sources until one differs from `before`, for at most `window`
async fn frame_source_change<F: Frame>(top: &F, before: &[String], interval: Duration, window: Duration) -> Option<Transition> {
	let poll = async {
		loop {
			tokio::time::sleep(interval).await;
			match top.frame_sources().await {
				Ok(now) if now.as_slice() != before => return Transition::FrameChanged,
				Ok(_) => {}
				Err(e) => tracing::debug!("iframe poll failed: {e}"),
			}
		}
	};
	tokio::time::timeout(window, poll).await.ok()
}

/// Move the top-level context to the next page and re-arm every context there.
///
/// Returns `Ok(false)` when there is no next page; the run is then over and the resume flag is cleared.
pub async fn navigate_next<F: Frame, K: KvStore>(top: &F, bus: &Bus, store: &K, timings: &Timings) -> Result<bool> {
	let dom = top.snapshot().await?;
	let Some((node, target)) = find_next_control(&dom).and_then(|n| Some((n, dom.handle(n)?))) else {
		log!("No next page found, stopping.");
		store.set_auto_solving(false)?;
		return Ok(false);
	};
	log!("Moving to: {}", dom.control_text(node));

	let before = top.frame_sources().await.unwrap_or_default();
	store.set_auto_solving(true)?;
	top.perform(&Interaction::Click { target }).await?;

	// first signal wins, the other future is dropped
	let transition = tokio::select! {
		changed = frame_source_change(top, &before, Timings::ms(timings.nav_poll_interval), Timings::ms(timings.nav_detect_window)) => {
			changed.unwrap_or(Transition::TimedOut)
		}
		_ = tokio::time::sleep(Timings::ms(timings.nav_fallback)) => Transition::TimedOut,
	};
	tracing::debug!("page transition: {transition:?}");

	bus.start_solving();
	Ok(true)
}

/// Where the current page is in its lifecycle
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PageState {
	Idle,
	/// Contexts are being solved, one after another
	Solving,
	/// Navigation to the next page is under way
	Leaving,
}

/// State shared between the serving loop and the page pass it spawns
struct Shared<A, K> {
	answerer: A,
	store: K,
	bus: Bus,
	timings: Timings,
	contexts: RefCell<HashMap<String, Rc<Orchestrator>>>,
	page: Cell<PageState>,
	/// Signalled once the last page has been reached
	finished: Notify,
}

impl<A: Answerer, K: KvStore> Shared<A, K> {
	/// Solve every context of the page in turn, then leave it at most once
	async fn page_pass<F: Frame>(&self, frames: Vec<F>, top: F) {
		let has_nested = frames.iter().any(|f| !f.is_top());
		let mut wants_next = false;
		for frame in &frames {
			let orchestrator = self.contexts.borrow_mut().entry(frame.label()).or_default().clone();
			if let Some(report) = orchestrator.start(frame, &self.answerer, &self.bus, &self.timings, has_nested).await {
				wants_next |= report.navigation_requested;
			}
		}
		if wants_next {
			self.leave(&top).await;
		} else {
			self.page.set(PageState::Idle);
		}
	}

	async fn leave<F: Frame>(&self, top: &F) {
		self.page.set(PageState::Leaving);
		match navigate_next(top, &self.bus, &self.store, &self.timings).await {
			Ok(true) => {}
			Ok(false) => self.finished.notify_one(),
			Err(e) => elog!("Navigation failed: {e}"),
		}
		self.page.set(PageState::Idle);
	}
}

/// Serves the top-level context and runs "start solving" over every context of the page.
///
/// Runs on a `LocalSet`. Contexts are solved strictly one after another, so a relayed popup on the top-level page
/// always belongs to the context that asked. Navigation happens once per page, after the last context is done.
pub struct Coordinator<S: FrameSource, A, K> {
	source: S,
	shared: Rc<Shared<A, K>>,
}

impl<S, A, K> Coordinator<S, A, K>
where
	S: FrameSource,
	A: Answerer + 'static,
	K: KvStore + 'static,
{
	pub fn new(source: S, answerer: A, store: K, bus: Bus, timings: Timings) -> Self {
		Self {
			source,
			shared: Rc::new(Shared {
				answerer,
				store,
				bus,
				timings,
				contexts: RefCell::new(HashMap::new()),
				page: Cell::new(PageState::Idle),
				finished: Notify::new(),
			}),
		}
	}

	pub fn bus(&self) -> &Bus {
		&self.shared.bus
	}

	pub fn page_state(&self) -> PageState {
		self.shared.page.get()
	}

	/// Resume an interrupted run if the store says one was in progress
	pub async fn resume_if_flagged(&self) -> bool {
		if !self.shared.store.auto_solving() {
			return false;
		}
		log!("Resuming interrupted run...");
		tokio::time::sleep(Timings::ms(self.shared.timings.resume_delay)).await;
		self.shared.bus.start_solving();
		true
	}

	/// Start a page pass over every reachable context. A no-op while the page is being solved or left.
	async fn dispatch_start(&self) {
		if self.shared.page.get() != PageState::Idle {
			tracing::debug!("page is {:?}, ignoring start", self.shared.page.get());
			return;
		}
		let frames = match self.source.contexts().await {
			Ok(frames) => frames,
			Err(e) => {
				elog!("Failed to enumerate frames: {e}");
				return;
			}
		};
		self.shared.page.set(PageState::Solving);

		let shared = self.shared.clone();
		let top = self.source.top();
		tokio::task::spawn_local(async move {
			shared.page_pass(frames, top).await;
		});
	}

	fn serve(&self, request: Request) {
		let top = self.source.top();
		let shared = self.shared.clone();
		match request {
			Request::NavigateNext => match shared.page.get() {
				PageState::Idle => {
					shared.page.set(PageState::Leaving);
					tokio::task::spawn_local(async move {
						shared.leave(&top).await;
					});
				}
				// the page pass leaves once its last context is done
				PageState::Solving => tracing::debug!("navigation deferred until every context is done"),
				PageState::Leaving => tracing::debug!("already leaving this page"),
			},
			Request::ResolveModal { reply } => {
				tokio::task::spawn_local(async move {
					let outcome = modal::dismiss_local(&top, &shared.timings).await.unwrap_or(ModalOutcome::Unknown);
					let _ = reply.send(outcome);
				});
			}
		}
	}

	/// Serve until the last page is done or every bus handle is gone
	pub async fn run(&self, mut rx: BusReceivers) {
		loop {
			tokio::select! {
				_ = self.shared.finished.notified() => return,
				msg = rx.broadcast.recv() => match msg {
					Ok(Broadcast::StartSolving) => self.dispatch_start().await,
					Err(broadcast::error::RecvError::Lagged(n)) => tracing::debug!("skipped {n} stale broadcasts"),
					Err(broadcast::error::RecvError::Closed) => return,
				},
				req = rx.requests.recv() => match req {
					Some(request) => self.serve(request),
					None => return,
				},
			}
		}
	}
}
