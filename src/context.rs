//! Execution contexts, as seen by the automation core

use color_eyre::Result;

use crate::{ContextKind, dom::DomSnapshot, interact::Interaction};

/// One document the automation can read and act on.
///
/// Everything here may fail at any time (the frame navigated away, the page is mid-reload); callers degrade instead
/// of propagating.
#[allow(async_fn_in_trait)]
pub trait Frame {
	fn kind(&self) -> ContextKind;

	/// Short human-readable name for logs
	fn label(&self) -> String;

	/// Fresh snapshot of the document, open shadow trees included
	async fn snapshot(&self) -> Result<DomSnapshot>;

	/// Replay an interaction. `Ok(false)` if the target element is gone.
	async fn perform(&self, action: &Interaction) -> Result<bool>;

	/// Current `src` of every iframe embedded in this document
	async fn frame_sources(&self) -> Result<Vec<String>>;

	fn is_top(&self) -> bool {
		self.kind() == ContextKind::Top
	}
}

/// Where the contexts of a page come from
#[allow(async_fn_in_trait)]
pub trait FrameSource {
	type Frame: Frame + Clone + 'static;

	fn top(&self) -> Self::Frame;

	/// Every context currently reachable, top-level first
	async fn contexts(&self) -> Result<Vec<Self::Frame>>;
}
