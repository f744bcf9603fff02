//! Frequency lexicon of aligned translations.
//!
//! For every ambiguous source word the lexicon keeps its translations ranked
//! by how often the aligner paired them, marks the most frequent
//! category-compatible one as the default, and numbers translations with
//! dense per-word class ids (`0..k-1`, in file order). The class ids are the
//! outcome labels of the training events and are resolved back to target
//! words when rules are emitted.
//!
//! Text form, one line per (source, target) pair, grouped by source word and
//! sorted by descending count within a group:
//!
//! ```text
//! 41 ^bank<n>$ ^banco<n>$ @
//! 7 ^bank<n>$ ^orilla<n>$
//! ```
//!
//! Public API:
//! - `FrequencyLexicon::from_counts`: rank and filter extraction counts
//! - `write_to` / `read_from` (and the `save` / `load` file helpers)
//! - `class_id` (forward index) and `target_for` (reverse index)
//! - `save_bincode` / `load_bincode` snapshots

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::{LexSelError, Result};
use crate::extract::CooccurrenceCounts;
use crate::token::tokenize_tagger_line;
use crate::utils::word_key;

pub const DEFAULT_MARKER: &str = "@";

/// Why a translation could not be added.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LexiconConflict {
    #[error("duplicate pair ({word}, {target})")]
    DuplicatePair { word: String, target: String },

    #[error("second default for {word} (class {previous} already marked)")]
    SecondDefault { word: String, previous: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Translation {
    pub target: String,
    /// Number of aligned occurrences.
    pub count: u64,
}

/// All translations of one source word; the class id is the position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LexiconEntry {
    pub source: String,
    pub translations: Vec<Translation>,
    /// Class id of the default translation.
    pub default: Option<u32>,
}

impl LexiconEntry {
    pub fn default_target(&self) -> Option<&str> {
        self.default
            .and_then(|c| self.translations.get(c as usize))
            .map(|t| t.target.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrequencyLexicon {
    entries: Vec<LexiconEntry>,
    #[serde(skip)]
    by_source: AHashMap<String, usize>,
    /// source -> target -> class id
    #[serde(skip)]
    forward: AHashMap<String, AHashMap<String, u32>>,
}

impl FrequencyLexicon {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rank extraction counts into a lexicon.
    ///
    /// Targets are sorted by descending count (ties keep first-seen order).
    /// Unknown-word targets and targets whose category differs from the
    /// source word's are dropped; the best surviving target is the default.
    /// A word left without targets is not entered at all.
    pub fn from_counts(counts: &CooccurrenceCounts) -> Self {
        let mut lexicon = Self::new();
        let mut dropped_words = 0usize;

        for source in counts.iter() {
            let mut ranked: Vec<_> = source.targets.iter().collect();
            ranked.sort_by(|a, b| b.count.cmp(&a.count));

            let mut kept = Vec::new();
            for target in ranked {
                if target.unknown {
                    warn!(source = %source.key, target = %target.key, "target word is unknown");
                    continue;
                }
                if source.category.is_none() || target.category != source.category {
                    warn!(
                        source = %source.key,
                        target = %target.key,
                        "category mismatch: {} != {}",
                        source.category.as_deref().unwrap_or("-"),
                        target.category.as_deref().unwrap_or("-")
                    );
                    continue;
                }
                kept.push(target);
            }

            if kept.is_empty() {
                debug!(source = %source.key, "no category-compatible translation");
                dropped_words += 1;
                continue;
            }

            for (rank, target) in kept.into_iter().enumerate() {
                // keys are unique per source in the counts, so this cannot clash
                let pushed = lexicon.push(&source.key, &target.key, target.count, rank == 0);
                debug_assert!(pushed.is_ok(), "{pushed:?}");
            }
        }

        info!(
            words = lexicon.len(),
            dropped = dropped_words,
            "frequency lexicon built"
        );
        lexicon
    }

    /// Append one translation; its class id is the next free one for `source`.
    pub fn push(
        &mut self,
        source: &str,
        target: &str,
        count: u64,
        is_default: bool,
    ) -> std::result::Result<u32, LexiconConflict> {
        let slot = match self.by_source.get(source) {
            Some(&i) => i,
            None => {
                self.entries.push(LexiconEntry {
                    source: source.to_string(),
                    translations: Vec::new(),
                    default: None,
                });
                self.by_source.insert(source.to_string(), self.entries.len() - 1);
                self.entries.len() - 1
            }
        };

        let classes = self.forward.entry(source.to_string()).or_default();
        if classes.contains_key(target) {
            return Err(LexiconConflict::DuplicatePair {
                word: source.to_string(),
                target: target.to_string(),
            });
        }
        let entry = &mut self.entries[slot];
        let class = entry.translations.len() as u32;
        if is_default {
            if let Some(previous) = entry.default {
                return Err(LexiconConflict::SecondDefault {
                    word: source.to_string(),
                    previous,
                });
            }
            entry.default = Some(class);
        }
        entry.translations.push(Translation {
            target: target.to_string(),
            count,
        });
        classes.insert(target.to_string(), class);
        Ok(class)
    }

    pub fn entries(&self) -> &[LexiconEntry] {
        &self.entries
    }

    pub fn entry(&self, source: &str) -> Option<&LexiconEntry> {
        self.by_source.get(source).map(|&i| &self.entries[i])
    }

    /// Translations of `source` in class-id order.
    pub fn translations(&self, source: &str) -> Vec<&str> {
        self.entry(source)
            .map(|e| e.translations.iter().map(|t| t.target.as_str()).collect())
            .unwrap_or_default()
    }

    pub fn default_for(&self, source: &str) -> Option<&str> {
        self.entry(source).and_then(LexiconEntry::default_target)
    }

    pub fn num_classes(&self, source: &str) -> usize {
        self.entry(source).map_or(0, |e| e.translations.len())
    }

    /// Forward index: (source, target) -> class id.
    pub fn class_id(&self, source: &str, target: &str) -> Option<u32> {
        self.forward.get(source)?.get(target).copied()
    }

    /// Reverse index: (source, class id) -> target.
    pub fn target_for(&self, source: &str, class: u32) -> Option<&str> {
        self.entry(source)?
            .translations
            .get(class as usize)
            .map(|t| t.target.as_str())
    }

    /// Number of source words.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn write_to<W: Write>(&self, mut w: W) -> Result<()> {
        for entry in &self.entries {
            for (class, t) in entry.translations.iter().enumerate() {
                write!(w, "{} {} {}", t.count, entry.source, t.target)?;
                if entry.default == Some(class as u32) {
                    write!(w, " {DEFAULT_MARKER}")?;
                }
                writeln!(w)?;
            }
        }
        w.flush()?;
        Ok(())
    }

    /// Parse the text form. Keys are re-normalized, class ids are assigned in
    /// file order; any inconsistency between the indices is fatal.
    pub fn read_from<R: BufRead>(r: R) -> Result<Self> {
        let mut lexicon = Self::new();
        for (n, line) in r.lines().enumerate() {
            let line_no = n + 1;
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let malformed = |reason: String| LexSelError::MalformedLexicon {
                line: line_no,
                reason,
            };

            let (count, rest) = line
                .split_once(char::is_whitespace)
                .ok_or_else(|| malformed("missing word pair".into()))?;
            let count: u64 = count
                .parse()
                .map_err(|_| malformed(format!("bad count `{count}`")))?;

            let tokens = tokenize_tagger_line(rest);
            if tokens.len() < 2 {
                return Err(malformed(format!("expected two words, found {}", tokens.len())));
            }
            let is_default = rest
                .rsplit_once('$')
                .map(|(_, tail)| tail.trim() == DEFAULT_MARKER)
                .unwrap_or(false);

            let source = word_key(&tokens[0]);
            let target = word_key(&tokens[1]);
            lexicon
                .push(&source, &target, count, is_default)
                .map_err(|e| malformed(e.to_string()))?;
        }
        lexicon.check_indices()?;
        Ok(lexicon)
    }

    fn check_indices(&self) -> Result<()> {
        for entry in &self.entries {
            let forward = self.forward.get(&entry.source).map_or(0, |m| m.len());
            if forward != entry.translations.len() {
                return Err(LexSelError::MalformedLexicon {
                    line: 0,
                    reason: format!(
                        "{}: forward index has {} classes, reverse index {}",
                        entry.source,
                        forward,
                        entry.translations.len()
                    ),
                });
            }
        }
        Ok(())
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        self.write_to(BufWriter::new(file))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::read_from(BufReader::new(file))
    }

    /// Save the lexicon to a file using bincode serialization.
    pub fn save_bincode<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        bincode::serialize_into(writer, self)?;
        Ok(())
    }

    /// Load the lexicon from a bincode file produced by `save_bincode`.
    pub fn load_bincode<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let stored: Self = bincode::deserialize_from(reader)?;
        Ok(stored.reindexed())
    }

    fn reindexed(mut self) -> Self {
        self.by_source.clear();
        self.forward.clear();
        for (i, entry) in self.entries.iter().enumerate() {
            self.by_source.insert(entry.source.clone(), i);
            let classes = self.forward.entry(entry.source.clone()).or_default();
            for (class, t) in entry.translations.iter().enumerate() {
                classes.insert(t.target.clone(), class as u32);
            }
        }
        self
    }
}
