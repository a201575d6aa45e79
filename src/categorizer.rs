use std::sync::Arc;

use log::warn;

use crate::category::{normalize, Category, Normalized, VOCABULARY};
use crate::completion::CompletionClient;
use crate::generator::Window;

/// Paragraphs longer than this are windowed before classification.
pub const LONG_FOR_CLASSIFY: usize = 500;

fn vocabulary_list() -> String {
    let quoted: Vec<String> = VOCABULARY.iter().map(|c| format!("\"{c}\"")).collect();
    let (last, rest) = quoted.split_last().map(|(l, r)| (l.clone(), r.join(", "))).unwrap_or_default();
    format!("{rest}, or {last}")
}

pub fn paragraph_prompt(paragraph: &str) -> String {
    let body = if paragraph.chars().count() > LONG_FOR_CLASSIFY {
        format!("{}...", Window::PARAGRAPH.slice(paragraph))
    } else {
        paragraph.to_string()
    };
    format!(
        "Analyze and then classify this paragraph into one and only one of the following \
         categories that best describes its content: {}. You must use one of the categories \
         I mentioned and the category may not exceed more than 3 words. Here's the paragraph:\n\n{body}",
        vocabulary_list()
    )
}

pub fn question_prompt(question: &str, paragraph_category: Option<Category>) -> String {
    let context = match paragraph_category {
        Some(c) if c != Category::Unknown => {
            format!("Given that the related paragraph falls under the \"{c}\" category, analyze")
        }
        _ => "Analyze".to_string(),
    };
    format!(
        "{context} and then classify this question into one and only one of the following \
         categories that best describes its content: {}. You must use one of the categories \
         I mentioned and the category may not exceed more than 3 words. Here's the question:\n\n{question}",
        vocabulary_list()
    )
}

/// Puts a paragraph or a question into one of the five labels.
pub struct Categorizer<C> {
    client: Arc<C>,
}

impl<C: CompletionClient> Categorizer<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self { client }
    }

    pub async fn classify_paragraph(&self, paragraph: &str) -> Option<Category> {
        self.classify(&paragraph_prompt(paragraph)).await
    }

    pub async fn classify_question(
        &self,
        question: &str,
        paragraph_category: Option<Category>,
    ) -> Option<Category> {
        self.classify(&question_prompt(question, paragraph_category)).await
    }

    /// `None` only when the completion call itself failed. Answers outside
    /// the vocabulary come back as [`Category::Unknown`].
    async fn classify(&self, prompt: &str) -> Option<Category> {
        let raw = match self.client.complete(prompt).await {
            Ok(raw) => raw,
            Err(err) => {
                warn!("categorization failed: {err:#}");
                return None;
            }
        };
        let category = match normalize(&raw) {
            Normalized::Exact(c) => c,
            Normalized::Repaired(c) => {
                warn!("category {raw:?} is not a label, mapped to {c}");
                c
            }
            Normalized::Unmatched => {
                warn!("category {raw:?} is not a label, using {}", Category::Unknown);
                Category::Unknown
            }
        };
        Some(category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedClient;

    #[test]
    fn prompts_name_every_label() {
        let prompt = paragraph_prompt("The dining hall is open late.");
        for c in VOCABULARY {
            assert!(prompt.contains(&format!("\"{c}\"")));
        }
        assert!(prompt.contains("\"Athletics and Art\", or \"About Us\""));
    }

    #[test]
    fn question_prompt_carries_context() {
        let with = question_prompt("Where do I eat?", Some(Category::CampusLife));
        assert!(with.starts_with("Given that the related paragraph falls under the \"Campus Life\""));
        let without = question_prompt("Where do I eat?", Some(Category::Unknown));
        assert!(without.starts_with("Analyze"));
    }

    #[tokio::test]
    async fn validates_answers() {
        let client = Arc::new(
            ScriptedClient::new()
                .ok("Campus Life")
                .ok("Athletics")
                .ok("Weather")
                .err("503 Service Unavailable"),
        );
        let categorizer = Categorizer::new(client);

        assert_eq!(categorizer.classify_paragraph("p").await, Some(Category::CampusLife));
        assert_eq!(categorizer.classify_paragraph("p").await, Some(Category::AthleticsAndArt));
        assert_eq!(categorizer.classify_question("q", None).await, Some(Category::Unknown));
        assert_eq!(categorizer.classify_question("q", None).await, None);
    }

    #[tokio::test]
    async fn question_call_sends_paragraph_category() {
        let client = Arc::new(ScriptedClient::new().ok("Admissions and Aid").ok("Academics"));
        let categorizer = Categorizer::new(Arc::clone(&client));

        let p_cat = categorizer.classify_paragraph("Apply by March 1.").await;
        categorizer.classify_question("When is the deadline?", p_cat).await;

        let prompts = client.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].ends_with("Apply by March 1."));
        assert!(prompts[1].contains("falls under the \"Admissions and Aid\" category"));
        assert!(prompts[1].ends_with("When is the deadline?"));
    }
}
