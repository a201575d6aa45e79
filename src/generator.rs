use std::sync::Arc;

use anyhow::Result;
use log::warn;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::completion::CompletionClient;
use crate::record::StreamRecord;

pub const QUESTION_MARKER: &str = "Question:";
pub const ANSWER_MARKER: &str = "Answer:";
pub const NO_QUESTION: &str = "Could not extract question";
pub const NO_ANSWER: &str = "Could not extract answer";

/// Character window used for long paragraphs. The first characters of a
/// scraped page are mostly navigation, so the window skips them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: usize,
    pub end: usize,
}

impl Window {
    pub const PARAGRAPH: Window = Window { start: 100, end: 4000 };

    /// Characters `[start, end)` of `text`, counted in chars.
    pub fn slice<'a>(&self, text: &'a str) -> &'a str {
        let byte_at = |n: usize| {
            text.char_indices()
                .nth(n)
                .map(|(i, _)| i)
                .unwrap_or(text.len())
        };
        let from = byte_at(self.start);
        let to = byte_at(self.end).max(from);
        &text[from..to]
    }
}

/// Texts longer than this are cut to [`Window::PARAGRAPH`].
pub const LONG_PARAGRAPH: usize = 4000;

pub fn build_prompt(paragraph: &str) -> String {
    if paragraph.chars().count() > LONG_PARAGRAPH {
        let window = Window::PARAGRAPH.slice(paragraph);
        format!(
            "Please read the following information and generate a simple user-like question \
             and an appropriate answer about the given information. Make sure the question \
             closely relates to the content of the given information. Make sure to only include \
             the question and the answer. The question should start with '{QUESTION_MARKER}' and \
             the answer should start with '{ANSWER_MARKER}'\n\n{window}..."
        )
    } else {
        format!(
            "Please analyze the following information and generate a simple user-like question \
             and an appropriate answer about the given information. Try not to focus too much on \
             financial aid questions unless the given information is about it. The question should \
             start with '{QUESTION_MARKER}' and the answer should start with '{ANSWER_MARKER}'\n\n\
             {paragraph}"
        )
    }
}

/// Split a completion into question and answer. `None` when either marker
/// is missing.
pub fn parse_pair(generated: &str) -> Option<(String, String)> {
    if !generated.contains(QUESTION_MARKER) {
        return None;
    }
    let (before, after) = generated.split_once(ANSWER_MARKER)?;
    let question = before.replace(QUESTION_MARKER, "").trim().to_string();
    let answer = after.trim().to_string();
    Some((question, answer))
}

pub fn sentinel_pair() -> (String, String) {
    (NO_QUESTION.to_string(), NO_ANSWER.to_string())
}

/// Streaming variant: shorter window, free-form query/response.
pub const SHORT_WINDOW: usize = 500;

pub fn synthetic_prompt(paragraph: &str) -> String {
    let head = "Based on the following information, generate a user-like query and an appropriate response:";
    if paragraph.chars().count() > SHORT_WINDOW {
        let window = Window { start: 0, end: SHORT_WINDOW }.slice(paragraph);
        format!("{head}\n\n{window}...")
    } else {
        format!("{head}\n\n{paragraph}")
    }
}

/// First blank-line separated block is the query, the second the response.
pub fn split_query_response(source: &str, generated: &str) -> StreamRecord {
    let mut parts = generated.split("\n\n").map(str::trim);
    match (parts.next(), parts.next()) {
        (Some(query), Some(response)) => StreamRecord {
            user_query: query.to_string(),
            response: response.to_string(),
        },
        _ => StreamRecord {
            user_query: format!("Query not generated for {source}."),
            response: format!("Response not generated for {source}."),
        },
    }
}

/// Rephrasings asked for per question when augmenting a dataset.
pub const REPHRASE_COUNT: usize = 4;

// "1. ", "2) ", "- " list markers in front of a rephrasing
static LIST_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:\d+[.)]|[-*])\s+").expect("list marker regex"));

pub fn rephrase_prompt(question: &str, count: usize) -> String {
    format!(
        "Please rephrase the following question in {count} different ways, ensuring each \
         version asks the same thing but with different wording:\n\n'{question}'"
    )
}

/// One rephrasing per non-empty line, list markers and quotes removed,
/// at most `count`.
pub fn parse_rephrasings(generated: &str, count: usize) -> Vec<String> {
    generated
        .lines()
        .map(|line| {
            let line = LIST_MARKER.replace(line, "");
            line.trim().trim_matches(|c: char| c == '"' || c == '\'').trim().to_string()
        })
        .filter(|line| !line.is_empty())
        .take(count)
        .collect()
}

/// Turns one paragraph into one question/answer pair with a single
/// completion call.
pub struct QaGenerator<C> {
    client: Arc<C>,
}

impl<C> Clone for QaGenerator<C> {
    fn clone(&self) -> Self {
        Self { client: Arc::clone(&self.client) }
    }
}

impl<C: CompletionClient> QaGenerator<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self { client }
    }

    /// Completion errors propagate; unparseable completions and blank
    /// paragraphs degrade to the sentinel strings.
    pub async fn generate(&self, paragraph: &str) -> Result<(String, String)> {
        if paragraph.trim().is_empty() {
            warn!("blank paragraph, using placeholder question/answer");
            return Ok(sentinel_pair());
        }
        let generated = self.client.complete(&build_prompt(paragraph)).await?;
        Ok(parse_pair(&generated).unwrap_or_else(|| {
            warn!("no Question:/Answer: markers in completion: {generated:?}");
            sentinel_pair()
        }))
    }

    /// Up to `count` rewordings of `question`. A failed call yields none,
    /// so the question is kept without children.
    pub async fn rephrase(&self, question: &str, count: usize) -> Vec<String> {
        if question.trim().is_empty() {
            return Vec::new();
        }
        match self.client.complete(&rephrase_prompt(question, count)).await {
            Ok(generated) => parse_rephrasings(&generated, count),
            Err(err) => {
                warn!("rephrasing failed for {question:?}: {err:#}");
                Vec::new()
            }
        }
    }
}
