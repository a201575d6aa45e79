//! Dataset maintenance after generation: review-driven filtering, category
//! repair, balancing, question augmentation and the train/validation split.

use std::collections::{BTreeMap, HashSet};

use anyhow::{bail, Result};
use log::{info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::Value;

use crate::category::{normalize, split_composite, Category, CategoryTally, CompositeCategory, Normalized};
use crate::record::{content_id, QaPair, RawParagraph};

/// Give every paragraph a content-hash `code`. Returns how many changed.
pub fn assign_ids(paragraphs: &mut [RawParagraph]) -> usize {
    let mut changed = 0;
    for p in paragraphs.iter_mut() {
        let code = content_id(p.prompt.as_deref().unwrap_or(""), &p.response);
        if p.code.as_deref() != Some(code.as_str()) {
            p.code = Some(code);
            changed += 1;
        }
    }
    changed
}

pub fn tally(pairs: &[QaPair]) -> CategoryTally {
    let mut t = CategoryTally::default();
    for p in pairs {
        t.record_composite(&p.category);
    }
    t
}

/// Rewrite every composite category through the label normalization.
/// Sides that match nothing become `Unknown`. Returns how many entries changed.
pub fn fix_categories(pairs: &mut [QaPair]) -> usize {
    let mut changed = 0;
    for pair in pairs.iter_mut() {
        let (p, q) = split_composite(&pair.category);
        let fixed = CompositeCategory::new(fix_side(p), q.map(fix_side).unwrap_or(Category::Unknown));
        let fixed = fixed.to_string();
        if fixed != pair.category {
            info!("ID {}: {:?} -> {:?}", pair.id, pair.category, fixed);
            pair.category = fixed;
            changed += 1;
        }
    }
    changed
}

fn fix_side(raw: &str) -> Category {
    let n = normalize(raw);
    if n == Normalized::Unmatched {
        warn!("category {raw:?} matches no label, using {}", Category::Unknown);
    }
    n.category()
}

/// Flag up to `count` random entries whose question category is `target`,
/// to thin out an over-represented category. Already flagged entries are
/// not picked again. Returns how many were flagged.
pub fn flag_category<R: Rng + ?Sized>(
    pairs: &mut [QaPair],
    target: Category,
    count: usize,
    rng: &mut R,
) -> usize {
    let matching: Vec<usize> = pairs
        .iter()
        .enumerate()
        .filter(|(_, p)| !p.flagged)
        .filter(|(_, p)| {
            let (_, q) = split_composite(&p.category);
            q.and_then(|s| s.parse::<Category>().ok()) == Some(target)
        })
        .map(|(i, _)| i)
        .collect();

    let picked: Vec<usize> = matching.choose_multiple(rng, count.min(matching.len())).copied().collect();
    for &i in &picked {
        pairs[i].flagged = true;
    }
    picked.len()
}

/// Mark `parent` with `"Parent": true` and follow it with one child per
/// rephrasing: ID `<parent ID>-<n>` (n from 1), same answer and category,
/// `"child_of"` pointing back and `"Parent": null`.
pub fn with_rephrasings(mut parent: QaPair, rephrasings: Vec<String>) -> Vec<QaPair> {
    parent.extra.insert("Parent".into(), Value::Bool(true));
    let mut out = Vec::with_capacity(rephrasings.len() + 1);
    for (n, question) in rephrasings.into_iter().enumerate() {
        let mut child = QaPair::new(
            format!("{}-{}", parent.id, n + 1),
            parent.system_prompt.clone(),
            question,
            parent.answer.clone(),
            parent.category.clone(),
        );
        child.extra.insert("child_of".into(), Value::String(parent.id.clone()));
        child.extra.insert("Parent".into(), Value::Null);
        out.push(child);
    }
    out.insert(0, parent);
    out
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FilterOptions {
    pub drop_flagged: bool,
    pub drop_duplicates: bool,
    pub drop_blank: bool,
}

#[derive(Debug, Default)]
pub struct FilterReport {
    pub kept: usize,
    pub flagged: usize,
    pub duplicates: usize,
    pub blank: usize,
    /// Categories of removed duplicates, each ID counted once.
    pub duplicate_tally: CategoryTally,
}

/// Drop entries that manual review or the duplicate pass ruled out.
pub fn filter_dataset(pairs: Vec<QaPair>, opts: FilterOptions) -> (Vec<QaPair>, FilterReport) {
    let mut report = FilterReport::default();
    let mut counted: HashSet<String> = HashSet::new();
    let mut kept = Vec::with_capacity(pairs.len());

    for pair in pairs {
        if opts.drop_blank && pair.question.trim().is_empty() {
            report.blank += 1;
            continue;
        }
        if opts.drop_duplicates && pair.is_duplicate {
            report.duplicates += 1;
            if counted.insert(pair.id.clone()) {
                report.duplicate_tally.record_composite(&pair.category);
            }
            continue;
        }
        if opts.drop_flagged && pair.flagged {
            report.flagged += 1;
            continue;
        }
        kept.push(pair);
    }
    report.kept = kept.len();
    (kept, report)
}

/// Split per composite category: `ratio` of each category (rounded down)
/// goes to validation, the rest to training.
pub fn split_validation<R: Rng + ?Sized>(
    pairs: Vec<QaPair>,
    ratio: f64,
    rng: &mut R,
) -> Result<(Vec<QaPair>, Vec<QaPair>)> {
    if !(0.0..=1.0).contains(&ratio) {
        bail!("validation ratio must be within [0, 1], got {ratio}");
    }
    let mut by_category: BTreeMap<String, Vec<QaPair>> = BTreeMap::new();
    for p in pairs {
        by_category.entry(p.category.clone()).or_default().push(p);
    }

    let mut validation = Vec::new();
    let mut training = Vec::new();
    for (category, mut entries) in by_category {
        entries.shuffle(rng);
        let split_index = (ratio * entries.len() as f64).floor() as usize;
        info!("{category}: {split_index} validation / {} training", entries.len() - split_index);
        let rest = entries.split_off(split_index);
        validation.extend(entries);
        training.extend(rest);
    }
    Ok((validation, training))
}
