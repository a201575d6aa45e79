//! Near-duplicate detection over generated questions.
//!
//! All questions of a batch are fitted into one TF-IDF space, then every
//! candidate pair `(i, j)` with `i < j` is scored by cosine similarity.
//! Pairs scoring strictly above the threshold become [`SimilarityEdge`]s.
//! Edges always come out in row-major order (`i` ascending, then `j`).

use std::collections::{BTreeMap, BTreeSet, HashMap};

use anyhow::{bail, Result};
use log::info;
use once_cell::sync::Lazy;
use rand::{rngs::StdRng, Rng, SeedableRng};
use regex::Regex;

use crate::record::{FlaggedPromptPair, FlaggedSide, ParagraphRecord, QaPair};

// Two or more word characters, the usual TF-IDF token rule.
static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\w\w+\b").expect("token regex"));

pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    TOKEN.find_iter(&lowered).map(|m| m.as_str().to_string()).collect()
}

/// Sparse row: `(term id, weight)` sorted by term id.
pub type SparseVec = Vec<(usize, f64)>;

/// TF-IDF model fitted on one batch of documents.
#[derive(Debug, Clone)]
pub struct TfIdf {
    vocabulary: BTreeMap<String, usize>,
    idf: Vec<f64>,
}

impl TfIdf {
    /// Fit on `docs` and return their L2-normalized rows.
    pub fn fit_transform<S: AsRef<str>>(docs: &[S]) -> (Self, Vec<SparseVec>) {
        let tokenized: Vec<Vec<String>> = docs.iter().map(|d| tokenize(d.as_ref())).collect();

        let mut vocabulary = BTreeMap::new();
        for tokens in &tokenized {
            for t in tokens {
                vocabulary.entry(t.clone()).or_insert(0usize);
            }
        }
        // ids in sorted term order
        for (id, slot) in vocabulary.values_mut().enumerate() {
            *slot = id;
        }

        let mut df = vec![0usize; vocabulary.len()];
        for tokens in &tokenized {
            let unique: BTreeSet<usize> = tokens.iter().map(|t| vocabulary[t]).collect();
            for id in unique {
                df[id] += 1;
            }
        }

        let n = docs.len() as f64;
        let idf = df
            .iter()
            .map(|&d| ((1.0 + n) / (1.0 + d as f64)).ln() + 1.0)
            .collect();

        let model = Self { vocabulary, idf };
        let rows = tokenized.iter().map(|t| model.row(t)).collect();
        (model, rows)
    }

    fn row(&self, tokens: &[String]) -> SparseVec {
        let mut counts: BTreeMap<usize, f64> = BTreeMap::new();
        for t in tokens {
            if let Some(&id) = self.vocabulary.get(t) {
                *counts.entry(id).or_default() += 1.0;
            }
        }
        let mut row: SparseVec = counts
            .into_iter()
            .map(|(id, tf)| (id, tf * self.idf[id]))
            .collect();
        let norm = row.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
        if norm > 0.0 {
            for (_, w) in &mut row {
                *w /= norm;
            }
        }
        row
    }

    pub fn vocabulary_len(&self) -> usize {
        self.vocabulary.len()
    }
}

/// Cosine similarity of two L2-normalized rows, clamped to `[0, 1]`.
pub fn cosine(a: &SparseVec, b: &SparseVec) -> f64 {
    let (mut i, mut j, mut dot) = (0, 0, 0.0);
    while i < a.len() && j < b.len() {
        match a[i].0.cmp(&b[j].0) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                dot += a[i].1 * b[j].1;
                i += 1;
                j += 1;
            }
        }
    }
    dot.clamp(0.0, 1.0)
}

/// A pair of batch indices whose questions are too similar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityEdge {
    pub i: usize,
    pub j: usize,
    pub score: f64,
}

/// Which pairs get scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateStrategy {
    /// Every pair of the upper triangle.
    Exhaustive,
    /// Random-hyperplane LSH: only pairs sharing a band bucket are scored.
    /// Can miss pairs, never reports one below the threshold.
    Lsh { bands: usize, rows: usize, seed: u64 },
}

impl CandidateStrategy {
    pub const DEFAULT_LSH: CandidateStrategy = CandidateStrategy::Lsh { bands: 16, rows: 4, seed: 42 };
}

#[derive(Debug, Clone, Copy)]
pub struct Deduplicator {
    threshold: f64,
    strategy: CandidateStrategy,
}

impl Deduplicator {
    pub fn new(threshold: f64, strategy: CandidateStrategy) -> Result<Self> {
        // scores are capped at 1.0 and compared with `>`, so 1.0 would never flag
        if !(0.0..1.0).contains(&threshold) {
            bail!("similarity threshold must be within [0, 1), got {threshold}");
        }
        if let CandidateStrategy::Lsh { bands, rows, .. } = strategy {
            if bands == 0 || rows == 0 || rows > 64 {
                bail!("lsh needs bands >= 1 and 1 <= rows <= 64, got {bands}x{rows}");
            }
        }
        Ok(Self { threshold, strategy })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Edges over one batch, fitted as a whole.
    pub fn find_edges<S: AsRef<str>>(&self, questions: &[S]) -> Vec<SimilarityEdge> {
        let (model, rows) = TfIdf::fit_transform(questions);
        let candidates: Box<dyn Iterator<Item = (usize, usize)>> = match self.strategy {
            CandidateStrategy::Exhaustive => {
                let n = rows.len();
                Box::new((0..n).flat_map(move |i| (i + 1..n).map(move |j| (i, j))))
            }
            CandidateStrategy::Lsh { bands, rows: width, seed } => Box::new(
                lsh_candidates(&rows, model.vocabulary_len(), bands, width, seed).into_iter(),
            ),
        };

        candidates
            .filter_map(|(i, j)| {
                let score = cosine(&rows[i], &rows[j]);
                (score > self.threshold).then_some(SimilarityEdge { i, j, score })
            })
            .collect()
    }

    /// Edges computed separately inside each group, mapped back to batch
    /// indices and merged into row-major order.
    pub fn find_edges_grouped<S, G>(&self, questions: &[S], groups: &[G]) -> Vec<SimilarityEdge>
    where
        S: AsRef<str>,
        G: Ord,
    {
        let mut by_group: BTreeMap<&G, Vec<usize>> = BTreeMap::new();
        for (idx, g) in groups.iter().enumerate().take(questions.len()) {
            by_group.entry(g).or_default().push(idx);
        }

        let mut edges = Vec::new();
        for members in by_group.values() {
            let local: Vec<&str> = members.iter().map(|&m| questions[m].as_ref()).collect();
            for e in self.find_edges(&local) {
                edges.push(SimilarityEdge { i: members[e.i], j: members[e.j], score: e.score });
            }
        }
        edges.sort_by_key(|e| (e.i, e.j));
        edges
    }
}

fn lsh_candidates(
    rows: &[SparseVec],
    dims: usize,
    bands: usize,
    width: usize,
    seed: u64,
) -> BTreeSet<(usize, usize)> {
    let mut rng = StdRng::seed_from_u64(seed);
    let planes: Vec<Vec<f64>> = (0..bands * width)
        .map(|_| (0..dims).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect();

    let mut buckets: HashMap<(usize, u64), Vec<usize>> = HashMap::new();
    for (idx, row) in rows.iter().enumerate() {
        for band in 0..bands {
            let mut key = 0u64;
            for r in 0..width {
                let plane = &planes[band * width + r];
                let side: f64 = row.iter().map(|&(id, w)| plane[id] * w).sum();
                if side >= 0.0 {
                    key |= 1 << r;
                }
            }
            buckets.entry((band, key)).or_default().push(idx);
        }
    }

    let mut candidates = BTreeSet::new();
    for members in buckets.values() {
        for (a, &i) in members.iter().enumerate() {
            for &j in &members[a + 1..] {
                candidates.insert((i.min(j), i.max(j)));
            }
        }
    }
    candidates
}

/// Flag both sides of every edge and snapshot them for review. A pair hit
/// by several edges is flagged once but appears in each audit entry.
pub fn flag_duplicates(
    pairs: &mut [QaPair],
    paragraphs: &[ParagraphRecord],
    edges: &[SimilarityEdge],
) -> Vec<FlaggedPromptPair> {
    let mut audit = Vec::with_capacity(edges.len());
    for e in edges {
        info!(
            "Questions {} and {} are very similar with a cosine similarity of {:.4}",
            e.i + 1,
            e.j + 1,
            e.score
        );
        pairs[e.i].mark_duplicate();
        pairs[e.j].mark_duplicate();
        let text = |k: usize| paragraphs.get(k).map(|p| p.text.as_str()).unwrap_or_default();
        audit.push(FlaggedPromptPair {
            first: FlaggedSide::snapshot(&pairs[e.i], text(e.i)),
            second: FlaggedSide::snapshot(&pairs[e.j], text(e.j)),
            similarity: e.score,
        });
    }
    audit
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exhaustive(threshold: f64) -> Deduplicator {
        Deduplicator::new(threshold, CandidateStrategy::Exhaustive).unwrap()
    }

    fn pairs_of(edges: &[SimilarityEdge]) -> Vec<(usize, usize)> {
        edges.iter().map(|e| (e.i, e.j)).collect()
    }

    #[test]
    fn tokenizer_drops_single_chars_and_lowercases() {
        assert_eq!(tokenize("Is a B.S. in CS offered?"), vec!["is", "in", "cs", "offered"]);
    }

    #[test]
    fn idf_matches_smoothed_formula() {
        let (model, rows) = TfIdf::fit_transform(&["apple banana", "apple cherry"]);
        assert_eq!(model.vocabulary_len(), 3);
        // apple: df 2 -> ln(3/3)+1 = 1; banana: df 1 -> ln(3/2)+1
        let banana = (1.5f64).ln() + 1.0;
        let norm = (1.0 + banana * banana).sqrt();
        assert!((rows[0][0].1 - 1.0 / norm).abs() < 1e-12);
        assert!((rows[0][1].1 - banana / norm).abs() < 1e-12);
    }

    #[test]
    fn identical_questions_score_one() {
        let qs = ["Where is the library?", "Where is the library?"];
        let edges = exhaustive(0.9).find_edges(&qs);
        assert_eq!(pairs_of(&edges), vec![(0, 1)]);
        assert!((edges[0].score - 1.0).abs() < 1e-9);
        assert_eq!(exhaustive(0.999).find_edges(&qs).len(), 1);
    }

    #[test]
    fn threshold_is_strict() {
        let qs = ["what are dorm hours", "what are library hours"];
        let (_, rows) = TfIdf::fit_transform(&qs);
        let score = cosine(&rows[0], &rows[1]);
        assert!(score > 0.0 && score < 1.0);

        assert!(exhaustive(score).find_edges(&qs).is_empty());
        assert_eq!(exhaustive(score - 1e-9).find_edges(&qs).len(), 1);
    }

    #[test]
    fn near_duplicates_flag_only_their_pair() {
        let qs = [
            "What are the admission requirements for the nursing program",
            "What are the admission requirements for the nursing program here",
            "Which sports teams compete during winter",
        ];
        let edges = exhaustive(0.9).find_edges(&qs);
        assert_eq!(pairs_of(&edges), vec![(0, 1)]);
        assert!(edges[0].score > 0.9);
    }

    #[test]
    fn rerun_is_idempotent() {
        let qs = ["a b c dorm", "dorm rules", "dorm rules please", "parking"];
        let d = exhaustive(0.5);
        assert_eq!(d.find_edges(&qs), d.find_edges(&qs));
    }

    #[test]
    fn edges_are_row_major() {
        let qs = ["parking permit cost", "parking permit cost", "parking permit cost"];
        assert_eq!(pairs_of(&exhaustive(0.9).find_edges(&qs)), vec![(0, 1), (0, 2), (1, 2)]);
    }

    #[test]
    fn tokenless_questions_never_match() {
        let qs = ["?", "?"];
        assert!(exhaustive(0.5).find_edges(&qs).is_empty());
    }

    #[test]
    fn grouped_edges_stay_inside_groups() {
        let qs = ["parking permit cost", "parking permit cost", "parking permit cost"];
        let groups = ["a", "b", "a"];
        let edges = exhaustive(0.9).find_edges_grouped(&qs, &groups);
        assert_eq!(pairs_of(&edges), vec![(0, 2)]);
    }

    #[test]
    fn lsh_finds_exact_duplicates_and_is_a_subset() {
        let qs = [
            "how do I apply for housing",
            "which majors are offered in engineering",
            "how do I apply for housing",
            "when is the homecoming game",
        ];
        let full = exhaustive(0.8).find_edges(&qs);
        let lsh = Deduplicator::new(0.8, CandidateStrategy::DEFAULT_LSH).unwrap().find_edges(&qs);
        // identical rows always share every bucket
        assert!(pairs_of(&lsh).contains(&(0, 2)));
        for e in &lsh {
            assert!(pairs_of(&full).contains(&(e.i, e.j)));
        }
    }

    #[test]
    fn rejects_bad_settings() {
        assert!(Deduplicator::new(1.5, CandidateStrategy::Exhaustive).is_err());
        assert!(Deduplicator::new(1.0, CandidateStrategy::Exhaustive).is_err());
        assert!(Deduplicator::new(-0.1, CandidateStrategy::Exhaustive).is_err());
        assert!(Deduplicator::new(0.9, CandidateStrategy::Lsh { bands: 0, rows: 4, seed: 1 }).is_err());
    }

    #[test]
    fn flagging_marks_both_sides_and_audits_each_edge() {
        let mut pairs: Vec<QaPair> = ["x", "y", "z"]
            .iter()
            .map(|id| QaPair::new(*id, "sys", format!("q{id}"), "a", "About Us | About Us"))
            .collect();
        let paragraphs: Vec<ParagraphRecord> = ["px", "py", "pz"]
            .iter()
            .map(|t| ParagraphRecord { id: String::new(), text: t.to_string(), source: None })
            .collect();
        let edges = [
            SimilarityEdge { i: 0, j: 1, score: 0.95 },
            SimilarityEdge { i: 0, j: 2, score: 0.91 },
        ];

        let audit = flag_duplicates(&mut pairs, &paragraphs, &edges);
        assert_eq!(audit.len(), 2);
        assert!(pairs.iter().all(|p| p.flagged && p.is_duplicate));
        assert_eq!(audit[0].first.paragraph, "px");
        assert_eq!(audit[1].second.id, "z");
    }
}
