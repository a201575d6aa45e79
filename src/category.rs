use std::{collections::BTreeMap, fmt, str::FromStr};

use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Separator between the paragraph side and the question side of a
/// composite category string.
pub const SEPARATOR: &str = " | ";

/// The five topical labels plus the fallback used when a completion does
/// not name any of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "Campus Life")]
    CampusLife,
    #[serde(rename = "Academics")]
    Academics,
    #[serde(rename = "Admissions and Aid")]
    AdmissionsAndAid,
    #[serde(rename = "Athletics and Art")]
    AthleticsAndArt,
    #[serde(rename = "About Us")]
    AboutUs,
    #[serde(rename = "Unknown")]
    Unknown,
}

/// Allowed labels, in the order they are listed in prompts.
pub const VOCABULARY: [Category; 5] = [
    Category::CampusLife,
    Category::Academics,
    Category::AdmissionsAndAid,
    Category::AthleticsAndArt,
    Category::AboutUs,
];

// lower-cased label -> category
static LABELS: phf::Map<&'static str, Category> = phf::phf_map! {
    "campus life" => Category::CampusLife,
    "academics" => Category::Academics,
    "admissions and aid" => Category::AdmissionsAndAid,
    "athletics and art" => Category::AthleticsAndArt,
    "about us" => Category::AboutUs,
};

// Keyword repairs for answers that are close but not exact. Checked in order,
// first hit wins.
const KEYWORDS: &[(&str, Category)] = &[
    ("athletics", Category::AthleticsAndArt),
    ("about us", Category::AboutUs),
    ("campus life", Category::CampusLife),
    ("admissions", Category::AdmissionsAndAid),
    ("academics", Category::Academics),
    ("art", Category::AthleticsAndArt),
    ("language", Category::AthleticsAndArt),
];

// Whole-word patterns, so "art" does not match inside "department"
static KEYWORD_RES: Lazy<Vec<(Regex, Category)>> = Lazy::new(|| {
    KEYWORDS
        .iter()
        .map(|(kw, c)| {
            let re = Regex::new(&format!(r"\b{}\b", regex::escape(kw))).expect("keyword regex");
            (re, *c)
        })
        .collect()
});

impl Category {
    pub fn label(self) -> &'static str {
        match self {
            Category::CampusLife => "Campus Life",
            Category::Academics => "Academics",
            Category::AdmissionsAndAid => "Admissions and Aid",
            Category::AthleticsAndArt => "Athletics and Art",
            Category::AboutUs => "About Us",
            Category::Unknown => "Unknown",
        }
    }

    /// Exact match against the vocabulary, ignoring case, surrounding
    /// whitespace, quotes and trailing punctuation.
    pub fn exact(raw: &str) -> Option<Category> {
        let cleaned = clean(raw);
        LABELS.get(cleaned.as_str()).copied()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        if clean(s) == "unknown" {
            return Ok(Category::Unknown);
        }
        Category::exact(s).ok_or_else(|| anyhow!("not a category label: {s:?}"))
    }
}

fn clean(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '.' | '*'))
        .trim()
        .to_lowercase()
}

/// How a raw completion answer was mapped onto the vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalized {
    Exact(Category),
    Repaired(Category),
    Unmatched,
}

impl Normalized {
    pub fn category(self) -> Category {
        match self {
            Normalized::Exact(c) | Normalized::Repaired(c) => c,
            Normalized::Unmatched => Category::Unknown,
        }
    }
}

/// Map a free-form label onto the vocabulary: exact label first, then the
/// keyword repairs.
pub fn normalize(raw: &str) -> Normalized {
    if let Some(c) = Category::exact(raw) {
        return Normalized::Exact(c);
    }
    let lowered = clean(raw);
    if lowered == "unknown" {
        return Normalized::Exact(Category::Unknown);
    }
    KEYWORD_RES
        .iter()
        .find(|(re, _)| re.is_match(&lowered))
        .map_or(Normalized::Unmatched, |(_, c)| Normalized::Repaired(*c))
}

/// `"<paragraph category> | <question category>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompositeCategory {
    pub paragraph: Category,
    pub question: Category,
}

impl CompositeCategory {
    pub fn new(paragraph: Category, question: Category) -> Self {
        Self { paragraph, question }
    }
}

impl fmt::Display for CompositeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.paragraph, self.question)
    }
}

impl FromStr for CompositeCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (p, q) = split_composite(s);
        let q = q.ok_or_else(|| anyhow!("category {s:?} has no question side"))?;
        Ok(Self::new(p.parse()?, q.parse()?))
    }
}

/// Split a stored composite category without validating either side.
/// Legacy files may hold a single label with no separator.
pub fn split_composite(raw: &str) -> (&str, Option<&str>) {
    match raw.split_once(SEPARATOR) {
        Some((p, q)) => (p.trim(), Some(q.trim())),
        None => (raw.trim(), None),
    }
}

/// Per-side frequency counts over a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoryTally {
    pub paragraph: BTreeMap<String, usize>,
    pub question: BTreeMap<String, usize>,
}

impl CategoryTally {
    pub fn record(&mut self, paragraph: &str, question: &str) {
        *self.paragraph.entry(paragraph.to_string()).or_default() += 1;
        *self.question.entry(question.to_string()).or_default() += 1;
    }

    /// Tally a stored composite string. A missing question side counts the
    /// paragraph side twice, which is what the old category scripts did.
    pub fn record_composite(&mut self, raw: &str) {
        let (p, q) = split_composite(raw);
        self.record(p, q.unwrap_or(p));
    }

    pub fn paragraph_total(&self) -> usize {
        self.paragraph.values().sum()
    }

    pub fn question_total(&self) -> usize {
        self.question.values().sum()
    }

    /// Operator-facing summary printed at the end of a run.
    pub fn report(&self) -> String {
        let fmt_counts = |counts: &BTreeMap<String, usize>| {
            counts
                .iter()
                .map(|(k, v)| format!("{k}: {v}"))
                .collect::<Vec<_>>()
                .join(", ")
        };
        format!(
            "Paragraph Category count: {{{}}}\n\
             Question Category count: {{{}}}\n\
             Grand Total Paragraph Count: {}",
            fmt_counts(&self.paragraph),
            fmt_counts(&self.question),
            self.paragraph_total()
        )
    }
}
