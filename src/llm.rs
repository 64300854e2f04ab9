use ask_llm::{Client as LlmClient, Conversation, Model, Role};
use color_eyre::{Result, eyre::eyre};
use v_utils::elog;

use crate::{QuestionRecord, config::AppConfig};

/// Best-guess option picked by the AI
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Suggestion {
	/// 0-based option index
	pub index: usize,
	pub raw: String,
}

/// Anything that can suggest an answer for a question
#[allow(async_fn_in_trait)]
pub trait Answerer {
	async fn suggest(&self, record: &QuestionRecord) -> Result<Suggestion>;
}

/// LLM response for single-choice questions
#[derive(Debug, serde::Deserialize)]
struct LlmSingleAnswer {
	#[allow(dead_code)]
	response: String,
	response_number: usize,
}

/// Answers through `ask_llm`. The credential is read by `ask_llm` from `CLAUDE_TOKEN`.
#[derive(Clone, Debug)]
pub struct LlmAnswerer {
	config: AppConfig,
}

impl LlmAnswerer {
	pub fn new(config: AppConfig) -> Self {
		Self { config }
	}

	async fn ask_once(&self, record: &QuestionRecord) -> Result<Suggestion> {
		let mut conv = Conversation::new();
		conv.add(Role::User, build_prompt(record));

		let client = LlmClient::new().model(Model::Medium).max_tokens(128).force_json();
		let response = client.conversation(&conv).await?;

		tracing::debug!("LLM raw response: {}", response.text);
		parse_answer(&response.text, record.options.len())
	}
}

impl Answerer for LlmAnswerer {
	async fn suggest(&self, record: &QuestionRecord) -> Result<Suggestion> {
		let attempts = self.config.api_retries + 1;
		let mut last_err = eyre!("no attempt made");
		for attempt in 1..=attempts {
			match self.ask_once(record).await {
				Ok(s) => return Ok(s),
				Err(e) => {
					if attempt < attempts {
						elog!("LLM request failed (attempt {attempt}/{attempts}): {e}");
						tokio::time::sleep(self.config.api_retry_delay(attempt)).await;
					}
					last_err = e;
				}
			}
		}
		Err(last_err)
	}
}

pub fn build_prompt(record: &QuestionRecord) -> String {
	let mut options_text = String::new();
	for (i, option) in record.options.iter().enumerate() {
		options_text.push_str(&format!("{}. {}\n", i + 1, option));
	}

	let question = if record.prompt_known() {
		record.prompt.clone()
	} else {
		"(The question text could not be read. Pick the most plausible option from the options alone.)".to_string()
	};

	format!(
		r#"You are answering a single-choice question. Pick the ONE correct answer.

Question:
{question}

Options:
{options_text}
Respond with JSON only, no markdown, in this exact format:
{{"response": "<the text of the correct answer>", "response_number": <the number of the correct answer>}}"#
	)
}

/// Parse the model's JSON answer into a 0-based index
pub fn parse_answer(raw: &str, option_count: usize) -> Result<Suggestion> {
	let json_str = raw.trim();
	let answer: LlmSingleAnswer = serde_json::from_str(json_str).map_err(|e| eyre!("Failed to parse LLM JSON response: {} - raw: '{}'", e, json_str))?;

	if answer.response_number == 0 || answer.response_number > option_count {
		return Err(eyre!("LLM returned invalid answer index: {} (expected 1-{})", answer.response_number, option_count));
	}

	Ok(Suggestion {
		index: answer.response_number - 1,
		raw: json_str.to_string(),
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::extract::UNKNOWN_QUESTION;

	#[test]
	fn parses_one_based_answers() {
		let s = parse_answer(r#" {"response": "Blue", "response_number": 2} "#, 4).unwrap();
		assert_eq!(s.index, 1);
		assert!(parse_answer(r#"{"response": "x", "response_number": 5}"#, 4).is_err());
		assert!(parse_answer(r#"{"response": "x", "response_number": 0}"#, 4).is_err());
		assert!(parse_answer("Blue, obviously", 4).is_err());
	}

	#[test]
	fn prompt_lists_options_and_flags_unknown_questions() {
		let record = QuestionRecord::new("Sky colour?".into(), vec!["Red".into(), "Blue".into()]);
		let prompt = build_prompt(&record);
		assert!(prompt.contains("Sky colour?"));
		assert!(prompt.contains("1. Red\n2. Blue\n"));

		let unknown = QuestionRecord::new(UNKNOWN_QUESTION.into(), vec!["Red".into()]);
		assert!(build_prompt(&unknown).contains("could not be read"));
	}
}
