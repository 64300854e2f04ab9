//! Execution contexts backed by a Chromium page over the DevTools protocol.
//!
//! Every context is addressed by a path of iframe indices from the top-level window, re-resolved page-side on each
//! call, so a context keeps working when its iframe's content is swapped in place. Cross-origin frames are
//! unreachable from script and never become contexts.

use chromiumoxide::{Page, cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams};
use color_eyre::{Result, eyre::eyre};
use serde::Deserialize;

use crate::{
	ContextKind,
	context::{Frame, FrameSource},
	dom::DomSnapshot,
	interact::{Interaction, REPLAY_JS},
};

const FRAMES_JS: &str = include_str!("frames.js");
const SNAPSHOT_JS: &str = include_str!("snapshot.js");
const OPEN_SHADOW_JS: &str = include_str!("open_shadow.js");

/// Force every shadow root created from now on to be open, in all frames of every new document
pub async fn install_open_shadow_patch(page: &Page) -> Result<()> {
	page.evaluate_on_new_document(AddScriptToEvaluateOnNewDocumentParams::new(OPEN_SHADOW_JS))
		.await
		.map_err(|e| eyre!("Failed to install shadow root patch: {}", e))?;
	Ok(())
}

#[derive(Clone)]
pub struct CdpFrame {
	page: Page,
	path: Vec<usize>,
}

impl CdpFrame {
	pub fn top(page: Page) -> Self {
		Self { page, path: Vec::new() }
	}

	/// Evaluate `body` with `win` bound to this context's window. `None` if the frame is unreachable or `body`
	/// returned nothing.
	async fn eval_in(&self, body: &str) -> Result<Option<serde_json::Value>> {
		let path = serde_json::to_string(&self.path).map_err(|e| eyre!("Failed to encode frame path: {}", e))?;
		let script = format!(
			r#"
			(function() {{
				{FRAMES_JS}
				const win = resolveFrame({path});
				if (!win) return null;
				{body}
			}})()
			"#
		);
		let result = self.page.evaluate(script).await.map_err(|e| eyre!("[{}] evaluation failed: {}", self.label(), e))?;
		Ok(result.value().filter(|v| !v.is_null()).cloned())
	}
}

impl Frame for CdpFrame {
	fn kind(&self) -> ContextKind {
		if self.path.is_empty() { ContextKind::Top } else { ContextKind::Nested }
	}

	fn label(&self) -> String {
		if self.path.is_empty() {
			"top".to_string()
		} else {
			let path: Vec<String> = self.path.iter().map(ToString::to_string).collect();
			format!("frame[{}]", path.join("/"))
		}
	}

	async fn snapshot(&self) -> Result<DomSnapshot> {
		let value = self
			.eval_in(&format!("return ({SNAPSHOT_JS})(win);"))
			.await?
			.ok_or_else(|| eyre!("[{}] frame is not reachable", self.label()))?;
		let json_str = value.as_str().ok_or_else(|| eyre!("[{}] snapshot was not a string", self.label()))?;
		let dom = DomSnapshot::from_json(json_str)?;
		tracing::debug!("[{}] snapshot: {} nodes", self.label(), dom.len());
		Ok(dom)
	}

	async fn perform(&self, action: &Interaction) -> Result<bool> {
		let action_json = serde_json::to_string(action).map_err(|e| eyre!("Failed to encode interaction: {}", e))?;
		let result = self.eval_in(&format!("return ({REPLAY_JS})(win, {action_json});")).await?;
		Ok(result.and_then(|v| v.as_bool()).unwrap_or(false))
	}

	async fn frame_sources(&self) -> Result<Vec<String>> {
		let value = self.eval_in("return JSON.stringify(deepIframes(win.document).map((f) => f.src || ''));").await?;
		let json_str = value.as_ref().and_then(|v| v.as_str()).unwrap_or("[]");
		serde_json::from_str(json_str).map_err(|e| eyre!("Failed to parse iframe sources: {}", e))
	}
}

#[derive(Debug, Deserialize)]
struct FrameEntry {
	path: Vec<usize>,
}

/// All same-origin documents of one page
#[derive(Clone)]
pub struct CdpFrames {
	page: Page,
}

impl CdpFrames {
	pub fn new(page: Page) -> Self {
		Self { page }
	}
}

impl FrameSource for CdpFrames {
	type Frame = CdpFrame;

	fn top(&self) -> CdpFrame {
		CdpFrame::top(self.page.clone())
	}

	async fn contexts(&self) -> Result<Vec<CdpFrame>> {
		let top = self.top();
		let value = top.eval_in("return JSON.stringify(listFrames());").await?;
		let json_str = value.as_ref().and_then(|v| v.as_str()).unwrap_or("[]");
		let entries: Vec<FrameEntry> = serde_json::from_str(json_str).map_err(|e| eyre!("Failed to parse frame list: {}", e))?;
		tracing::debug!("found {} nested frame(s)", entries.len());

		let mut frames = vec![top];
		frames.extend(entries.into_iter().map(|e| CdpFrame {
			page: self.page.clone(),
			path: e.path,
		}));
		Ok(frames)
	}
}
