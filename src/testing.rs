use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use anyhow::{anyhow, Result};

use crate::completion::CompletionClient;

/// Completion client that replays a script of replies and records prompts.
#[derive(Default)]
pub struct ScriptedClient {
    replies: Mutex<VecDeque<Result<String, String>>>,
    fallback: Option<String>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply used once the script runs dry; without one the client errors.
    pub fn with_fallback(mut self, reply: &str) -> Self {
        self.fallback = Some(reply.to_string());
        self
    }

    pub fn ok(self, reply: &str) -> Self {
        self.replies.lock().unwrap().push_back(Ok(reply.to_string()));
        self
    }

    pub fn err(self, msg: &str) -> Self {
        self.replies.lock().unwrap().push_back(Err(msg.to_string()));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl CompletionClient for ScriptedClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(msg)) => Err(anyhow!(msg)),
            None => self
                .fallback
                .clone()
                .ok_or_else(|| anyhow!("script exhausted")),
        }
    }
}

/// Answers by looking at the prompt: QA prompts get a question built from
/// the paragraph, classification prompts get a fixed label (or an error when
/// no label is set).
pub struct EchoClient {
    pub label: Option<String>,
}

impl EchoClient {
    pub fn labelled(label: &str) -> Self {
        Self { label: Some(label.to_string()) }
    }

    pub fn failing_classifier() -> Self {
        Self { label: None }
    }
}

impl CompletionClient for EchoClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        if prompt.contains("classify") {
            return self.label.clone().ok_or_else(|| anyhow!("500 classifier unavailable"));
        }
        let body = prompt.rsplit("\n\n").next().unwrap_or_default();
        Ok(format!("Question: {body}\nAnswer: see the page"))
    }
}
