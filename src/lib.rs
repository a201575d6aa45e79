//! Question/answer dataset builder for the university chatbot.
//!
//! Paragraphs scraped upstream go through a completion API twice: once to
//! write a question/answer pair, once more to put the paragraph and the
//! question into one of five fixed categories. Afterwards the whole batch
//! is checked for near-duplicate questions with a TF-IDF cosine pass and
//! written out together with an audit list of the flagged pairs.
//!
//! The binaries under `src/bin/` are thin clap front ends over these modules.

pub mod assembler;
pub mod categorizer;
pub mod category;
pub mod cleanup;
pub mod completion;
pub mod dedup;
pub mod dispatch;
pub mod generator;
pub mod logging;
pub mod record;
pub mod retry;

#[cfg(test)]
pub(crate) mod testing;
