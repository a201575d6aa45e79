use std::{
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, BufWriter, Write},
    path::Path,
};

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, ser::SerializeMap, ser::SerializeSeq, Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value};
use sha2::{Digest, Sha256};

/// Number of hex characters kept from the content hash.
pub const ID_LEN: usize = 5;

// Raw input row as written by the extraction scripts
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawParagraph {
    pub response: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    // Anything else is passed through untouched
    #[serde(flatten)]
    pub extra: JsonMap<String, Value>,
}

/// One unit of source text, input to QA generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParagraphRecord {
    pub id: String,
    pub text: String,
    /// Where the text came from, if the extraction step recorded it.
    pub source: Option<String>,
}

impl From<RawParagraph> for ParagraphRecord {
    fn from(raw: RawParagraph) -> Self {
        let id = match raw.code {
            Some(code) => code,
            None => content_id(raw.prompt.as_deref().unwrap_or(""), &raw.response),
        };
        Self {
            id,
            text: raw.response,
            source: raw.prompt,
        }
    }
}

/// Short content hash used as a stable record ID: the first five hex
/// characters of SHA-256 over `prompt + response`.
pub fn content_id(prompt: &str, response: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(response.as_bytes());
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(ID_LEN);
    digest
}

/// A generated question/answer record, one per input paragraph.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct QaPair {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "System Prompt", default)]
    pub system_prompt: String,
    pub question: String,
    pub answer: String,
    pub category: String,
    #[serde(rename = "Flagged", default)]
    pub flagged: bool,
    // older dataset files spell it with a space
    #[serde(rename = "Is_Duplicate", alias = "Is Duplicate", default)]
    pub is_duplicate: bool,

    #[serde(flatten)]
    pub extra: JsonMap<String, Value>,
}

impl QaPair {
    pub fn new(
        id: impl Into<String>,
        system_prompt: impl Into<String>,
        question: impl Into<String>,
        answer: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            system_prompt: system_prompt.into(),
            question: question.into(),
            answer: answer.into(),
            category: category.into(),
            flagged: false,
            is_duplicate: false,
            extra: JsonMap::new(),
        }
    }

    /// Flag this pair as one side of a near-duplicate edge.
    pub fn mark_duplicate(&mut self) {
        self.flagged = true;
        self.is_duplicate = true;
    }
}

/// One side of a flagged pair, snapshotted for manual review.
#[derive(Debug, Clone, PartialEq)]
pub struct FlaggedSide {
    pub id: String,
    pub question: String,
    pub answer: String,
    pub category: String,
    pub paragraph: String,
}

impl FlaggedSide {
    pub fn snapshot(pair: &QaPair, paragraph: &str) -> Self {
        Self {
            id: pair.id.clone(),
            question: pair.question.clone(),
            answer: pair.answer.clone(),
            category: pair.category.clone(),
            paragraph: paragraph.to_string(),
        }
    }
}

/// Audit record for one near-duplicate edge `(first, second)`.
///
/// Serialized as a two-element array whose objects carry side-numbered keys
/// (`ID1`, `question1`, ... / `ID2`, `question2`, ...), the layout the
/// review tooling already reads.
#[derive(Debug, Clone, PartialEq)]
pub struct FlaggedPromptPair {
    pub first: FlaggedSide,
    pub second: FlaggedSide,
    pub similarity: f64,
}

struct NumberedSide<'a>(&'a FlaggedSide, u8);

impl Serialize for NumberedSide<'_> {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let NumberedSide(side, n) = self;
        let mut map = s.serialize_map(Some(5))?;
        map.serialize_entry(&format!("ID{n}"), &side.id)?;
        map.serialize_entry(&format!("question{n}"), &side.question)?;
        map.serialize_entry(&format!("answer{n}"), &side.answer)?;
        map.serialize_entry(&format!("category{n}"), &side.category)?;
        map.serialize_entry(&format!("paragraph{n}"), &side.paragraph)?;
        map.end()
    }
}

impl Serialize for FlaggedPromptPair {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let mut seq = s.serialize_seq(Some(2))?;
        seq.serialize_element(&NumberedSide(&self.first, 1))?;
        seq.serialize_element(&NumberedSide(&self.second, 2))?;
        seq.end()
    }
}

/// Line format of the streaming variant.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StreamRecord {
    #[serde(rename = "User Query")]
    pub user_query: String,
    #[serde(rename = "Response")]
    pub response: String,
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("failed to parse {}", path.display()))
}

pub fn write_json<T: Serialize + ?Sized>(path: &Path, data: &T) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, data)
        .with_context(|| format!("failed to write {}", path.display()))?;
    writer.flush()?;
    Ok(())
}

pub fn load_paragraphs(path: &Path) -> Result<Vec<ParagraphRecord>> {
    let raw: Vec<RawParagraph> = read_json(path)?;
    Ok(raw.into_iter().map(ParagraphRecord::from).collect())
}

/// Append one JSON object per line, opening the file in append mode.
pub fn append_jsonl<T: Serialize>(path: &Path, item: &T) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {} for append", path.display()))?;
    let line = serde_json::to_string(item)?;
    writeln!(file, "{line}").with_context(|| format!("failed to append to {}", path.display()))?;
    Ok(())
}

/// Read a JSONL file, skipping blank lines.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut out = Vec::new();
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let item = serde_json::from_str(&line)
            .with_context(|| format!("{}:{}: bad JSON line", path.display(), n + 1))?;
        out.push(item);
    }
    Ok(out)
}
