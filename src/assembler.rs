use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Result};
use indicatif::ProgressBar;
use log::info;

use crate::categorizer::Categorizer;
use crate::category::{Category, CategoryTally, CompositeCategory};
use crate::completion::CompletionClient;
use crate::dedup::{flag_duplicates, Deduplicator, SimilarityEdge};
use crate::dispatch::Dispatcher;
use crate::generator::QaGenerator;
use crate::record::{write_json, FlaggedPromptPair, ParagraphRecord, QaPair};

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are an expert assistant helping a student with a question about your university.";

/// Which questions are compared with each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum DedupScope {
    /// The whole batch.
    Global,
    /// Only questions whose paragraphs share a category.
    ParagraphCategory,
    /// Only questions that share a question category.
    QuestionCategory,
}

/// When categorization runs relative to the duplicate search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CategorizeStage {
    BeforeDedup,
    AfterDedup,
}

#[derive(Debug, Clone)]
pub struct AssemblerConfig {
    pub system_prompt: String,
    pub scope: DedupScope,
    pub stage: CategorizeStage,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            scope: DedupScope::Global,
            stage: CategorizeStage::BeforeDedup,
        }
    }
}

impl AssemblerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.stage == CategorizeStage::AfterDedup && self.scope != DedupScope::Global {
            bail!("a per-category dedup scope needs categories first; use --categorize before-dedup");
        }
        Ok(())
    }
}

/// Everything a run produces.
#[derive(Debug)]
pub struct BatchOutcome {
    pub pairs: Vec<QaPair>,
    pub flagged: Vec<FlaggedPromptPair>,
    pub edges: Vec<SimilarityEdge>,
    pub tally: CategoryTally,
}

/// Drives generation, categorization and the duplicate pass over one batch.
pub struct DatasetAssembler<C> {
    generator: QaGenerator<C>,
    categorizer: Categorizer<C>,
    dedup: Deduplicator,
    dispatcher: Dispatcher,
    config: AssemblerConfig,
}

impl<C: CompletionClient + 'static> DatasetAssembler<C> {
    pub fn new(
        client: Arc<C>,
        dedup: Deduplicator,
        dispatcher: Dispatcher,
        config: AssemblerConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            generator: QaGenerator::new(Arc::clone(&client)),
            categorizer: Categorizer::new(client),
            dedup,
            dispatcher,
            config,
        })
    }

    pub async fn run(&self, paragraphs: &[ParagraphRecord], bar: &ProgressBar) -> Result<BatchOutcome> {
        bar.set_length(2 * paragraphs.len() as u64);

        // generation, possibly concurrent; back into input order afterwards
        let texts: Vec<String> = paragraphs.iter().map(|p| p.text.clone()).collect();
        let generator = self.generator.clone();
        let mut generated = self
            .dispatcher
            .run(texts, bar, move |_, text| {
                let generator = generator.clone();
                async move { generator.generate(&text).await }
            })
            .await?;
        generated.sort_by_key(|(idx, _)| *idx);
        info!("generated {} question/answer pair(s)", generated.len());

        let mut pairs: Vec<QaPair> = paragraphs
            .iter()
            .zip(generated)
            .map(|(p, (_, (question, answer)))| {
                QaPair::new(p.id.clone(), self.config.system_prompt.clone(), question, answer, "")
            })
            .collect();

        let (categories, edges) = match self.config.stage {
            CategorizeStage::BeforeDedup => {
                let categories = self.categorize_all(paragraphs, &mut pairs, bar).await;
                let edges = self.find_edges(&pairs, &categories);
                (categories, edges)
            }
            CategorizeStage::AfterDedup => {
                let edges = self.find_edges(&pairs, &[]);
                let categories = self.categorize_all(paragraphs, &mut pairs, bar).await;
                (categories, edges)
            }
        };

        let mut tally = CategoryTally::default();
        for c in &categories {
            tally.record(c.paragraph.label(), c.question.label());
        }

        let flagged = flag_duplicates(&mut pairs, paragraphs, &edges);
        info!(
            "{} similar pair(s) above {} across {} question(s)",
            edges.len(),
            self.dedup.threshold(),
            pairs.len()
        );

        Ok(BatchOutcome { pairs, flagged, edges, tally })
    }

    async fn categorize_all(
        &self,
        paragraphs: &[ParagraphRecord],
        pairs: &mut [QaPair],
        bar: &ProgressBar,
    ) -> Vec<CompositeCategory> {
        let mut categories = Vec::with_capacity(pairs.len());
        for (paragraph, pair) in paragraphs.iter().zip(pairs.iter_mut()) {
            let p_cat = self.categorizer.classify_paragraph(&paragraph.text).await;
            let q_cat = self.categorizer.classify_question(&pair.question, p_cat).await;
            let composite = CompositeCategory::new(
                p_cat.unwrap_or(Category::Unknown),
                q_cat.unwrap_or(Category::Unknown),
            );
            pair.category = composite.to_string();
            bar.println(format!(
                "Generated question based on paragraph: {}... | Category: {composite}",
                preview(&paragraph.text, 50)
            ));
            bar.inc(1);
            categories.push(composite);
        }
        categories
    }

    fn find_edges(&self, pairs: &[QaPair], categories: &[CompositeCategory]) -> Vec<SimilarityEdge> {
        let questions: Vec<&str> = pairs.iter().map(|p| p.question.as_str()).collect();
        match self.config.scope {
            DedupScope::Global => self.dedup.find_edges(&questions),
            DedupScope::ParagraphCategory => {
                let groups: Vec<Category> = categories.iter().map(|c| c.paragraph).collect();
                self.dedup.find_edges_grouped(&questions, &groups)
            }
            DedupScope::QuestionCategory => {
                let groups: Vec<Category> = categories.iter().map(|c| c.question).collect();
                self.dedup.find_edges_grouped(&questions, &groups)
            }
        }
    }
}

/// Write the dataset and the audit list.
pub fn persist(outcome: &BatchOutcome, primary: &Path, audit: &Path) -> Result<()> {
    write_json(primary, &outcome.pairs)?;
    info!("wrote {} pair(s) to {}", outcome.pairs.len(), primary.display());
    write_json(audit, &outcome.flagged)?;
    info!("wrote {} flagged pair(s) to {}", outcome.flagged.len(), audit.display());
    Ok(())
}

/// `<dir>/<stem>_flagged.json` next to the primary output.
pub fn audit_path_for(primary: &Path) -> PathBuf {
    let stem = primary
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    primary.with_file_name(format!("{stem}_flagged.json"))
}

fn preview(text: &str, chars: usize) -> String {
    text.chars().take(chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::SEPARATOR;
    use crate::dedup::CandidateStrategy;
    use crate::dispatch::Mode;
    use crate::testing::EchoClient;
    use tokio::time::Duration;

    fn paragraphs(texts: &[&str]) -> Vec<ParagraphRecord> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| ParagraphRecord { id: format!("id{i}"), text: t.to_string(), source: None })
            .collect()
    }

    fn assembler(client: EchoClient, mode: Mode, config: AssemblerConfig) -> DatasetAssembler<EchoClient> {
        DatasetAssembler::new(
            Arc::new(client),
            Deduplicator::new(0.9, CandidateStrategy::Exhaustive).unwrap(),
            Dispatcher::new(mode, 4, Duration::ZERO).unwrap(),
            config,
        )
        .unwrap()
    }

    const NEAR: [&str; 3] = [
        "What are the admission requirements for the nursing program",
        "What are the admission requirements for the nursing program here",
        "Which sports teams compete during winter",
    ];

    #[tokio::test]
    async fn near_duplicates_produce_one_audit_entry() {
        let a = assembler(EchoClient::labelled("Academics"), Mode::Sequential, AssemblerConfig::default());
        let input = paragraphs(&NEAR);
        let out = a.run(&input, &ProgressBar::hidden()).await.unwrap();

        assert_eq!(out.pairs.len(), 3);
        assert_eq!(out.flagged.len(), 1);
        assert!(out.pairs[0].is_duplicate && out.pairs[0].flagged);
        assert!(out.pairs[1].is_duplicate && out.pairs[1].flagged);
        assert!(!out.pairs[2].is_duplicate && !out.pairs[2].flagged);
        assert_eq!(out.flagged[0].first.id, "id0");
        assert_eq!(out.flagged[0].second.paragraph, NEAR[1]);
        assert_eq!(out.tally.paragraph["Academics"], 3);
    }

    #[tokio::test]
    async fn identical_questions_are_flagged_with_score_one() {
        let a = assembler(EchoClient::labelled("About Us"), Mode::Concurrent, AssemblerConfig::default());
        let input = paragraphs(&["Where is the bookstore", "Where is the bookstore"]);
        let out = a.run(&input, &ProgressBar::hidden()).await.unwrap();

        assert_eq!(out.edges.len(), 1);
        assert!((out.flagged[0].similarity - 1.0).abs() < 1e-9);
        assert!(out.pairs.iter().all(|p| p.is_duplicate));
    }

    #[tokio::test]
    async fn failed_categorization_still_yields_two_sided_category() {
        let a = assembler(EchoClient::failing_classifier(), Mode::Sequential, AssemblerConfig::default());
        let input = paragraphs(&["Parking permits are sold online."]);
        let out = a.run(&input, &ProgressBar::hidden()).await.unwrap();

        let category = &out.pairs[0].category;
        assert_eq!(category.matches(SEPARATOR).count(), 1);
        let (p, q) = category.split_once(SEPARATOR).unwrap();
        assert_eq!((p, q), ("Unknown", "Unknown"));
    }

    #[tokio::test]
    async fn concurrent_generation_keeps_paragraph_order() {
        let a = assembler(EchoClient::labelled("Campus Life"), Mode::Concurrent, AssemblerConfig::default());
        let texts: Vec<String> = (0..12).map(|i| format!("fact number {i} about campus")).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let input = paragraphs(&refs);
        let out = a.run(&input, &ProgressBar::hidden()).await.unwrap();

        for (i, pair) in out.pairs.iter().enumerate() {
            assert_eq!(pair.id, format!("id{i}"));
            assert_eq!(pair.question, texts[i]);
            assert_eq!(pair.system_prompt, DEFAULT_SYSTEM_PROMPT);
        }
    }

    #[tokio::test]
    async fn scoped_dedup_ignores_other_categories() {
        let config = AssemblerConfig { scope: DedupScope::QuestionCategory, ..AssemblerConfig::default() };
        let a = assembler(EchoClient::labelled("Academics"), Mode::Sequential, config);
        let input = paragraphs(&["Where is the bookstore", "Where is the bookstore"]);
        // one category for everything, so the scoped pass matches the global one
        let out = a.run(&input, &ProgressBar::hidden()).await.unwrap();
        assert_eq!(out.flagged.len(), 1);
    }

    #[test]
    fn after_dedup_needs_global_scope() {
        let config = AssemblerConfig {
            scope: DedupScope::ParagraphCategory,
            stage: CategorizeStage::AfterDedup,
            ..AssemblerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn audit_path_sits_next_to_output() {
        assert_eq!(audit_path_for(Path::new("out/run1.json")), PathBuf::from("out/run1_flagged.json"));
    }

    #[tokio::test]
    async fn persist_writes_both_files() {
        let a = assembler(EchoClient::labelled("Academics"), Mode::Sequential, AssemblerConfig::default());
        let out = a.run(&paragraphs(&NEAR), &ProgressBar::hidden()).await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let primary = dir.path().join("run.json");
        let audit = audit_path_for(&primary);
        persist(&out, &primary, &audit).unwrap();

        let written: Vec<QaPair> = crate::record::read_json(&primary).unwrap();
        assert_eq!(written, out.pairs);
        let audit_json: serde_json::Value = crate::record::read_json(&audit).unwrap();
        assert_eq!(audit_json[0][0]["ID1"], "id0");
        assert_eq!(audit_json[0][1]["ID2"], "id1");
    }
}
