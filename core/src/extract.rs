//! Candidate extraction.
//!
//! Walks the source-tagged, biltrans, target-tagged and alignment streams in
//! lock-step, one sentence per line of each. Sentences containing at least
//! one word with several dictionary translations are written to the candidate
//! file, and every aligned translation of such a word is counted into a
//! [`CooccurrenceCounts`] accumulator that later becomes the frequency
//! lexicon.
//!
//! Nothing a single sentence does can abort the run: rejected and broken
//! sentences are logged with their 1-based id and counted in
//! [`ExtractStats`].

use std::io::{BufRead, Write};

use ahash::AHashMap;
use tracing::{debug, info, warn};

use crate::corpus::{AlignmentParseError, AlignmentPair, CandidateRecord, CandidateWriter};
use crate::error::Result;
use crate::token::{tokenize_biltrans_line, tokenize_tagger_line, TaggedToken};
use crate::utils::{category, percent, word_key};

/// One sentence worth of stream lines.
#[derive(Debug, Clone, Copy)]
pub struct SentenceGroup<'a> {
    pub source: &'a str,
    pub biltrans: &'a str,
    pub target: &'a str,
    pub alignment: &'a str,
}

/// Run counters. `valid + errors == total` always holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractStats {
    pub total: usize,
    pub valid: usize,
    /// Every sentence that was not retained, whatever the reason.
    pub errors: usize,
    pub empty: usize,
    pub not_ambiguous: usize,
    pub too_short: usize,
    pub malformed: usize,
    /// Retained sentences whose source and biltrans token counts differ.
    pub length_mismatches: usize,
}

impl ExtractStats {
    pub fn log_summary(&self) {
        info!(total = self.total, "candidate extraction finished");
        info!(
            "valid: {} ({:.1}%)",
            self.valid,
            percent(self.valid, self.total)
        );
        info!(
            "errors: {} ({:.1}%)",
            self.errors,
            percent(self.errors, self.total)
        );
        debug!(
            empty = self.empty,
            not_ambiguous = self.not_ambiguous,
            too_short = self.too_short,
            malformed = self.malformed,
            length_mismatches = self.length_mismatches,
            "rejection breakdown"
        );
    }
}

/// Per-sentence failures. Never escapes this module.
#[derive(Debug, thiserror::Error)]
enum SentenceError {
    #[error(transparent)]
    Alignment(#[from] AlignmentParseError),

    #[error("alignment {target_index}-{source_index} outside sentence ({source_len} source, {target_len} target tokens)")]
    OutOfBounds {
        target_index: usize,
        source_index: usize,
        source_len: usize,
        target_len: usize,
    },
}

enum Rejection {
    Empty,
    NotAmbiguous,
    TooShort,
}

enum Outcome {
    Rejected(Rejection),
    Retained {
        pairs: Vec<(TaggedToken, TaggedToken)>,
        length_mismatch: bool,
    },
}

/// Observed target translation of one source word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetCount {
    pub key: String,
    pub category: Option<String>,
    pub unknown: bool,
    pub count: u64,
}

/// Aligned translations of one ambiguous source word, in first-seen order.
#[derive(Debug, Clone)]
pub struct SourceCounts {
    pub key: String,
    pub category: Option<String>,
    pub targets: Vec<TargetCount>,
    target_index: AHashMap<String, usize>,
}

/// Running (source word -> aligned target word) co-occurrence counts.
///
/// Iteration follows insertion order so that ties rank deterministically.
#[derive(Debug, Clone, Default)]
pub struct CooccurrenceCounts {
    sources: Vec<SourceCounts>,
    index: AHashMap<String, usize>,
}

impl CooccurrenceCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, source: &TaggedToken, target: &TaggedToken) {
        let key = word_key(source);
        let slot = match self.index.get(&key) {
            Some(&i) => i,
            None => {
                self.sources.push(SourceCounts {
                    key: key.clone(),
                    category: category(source),
                    targets: Vec::new(),
                    target_index: AHashMap::new(),
                });
                self.index.insert(key, self.sources.len() - 1);
                self.sources.len() - 1
            }
        };

        let entry = &mut self.sources[slot];
        let target_key = word_key(target);
        match entry.target_index.get(&target_key) {
            Some(&i) => entry.targets[i].count += 1,
            None => {
                entry.targets.push(TargetCount {
                    key: target_key.clone(),
                    category: category(target),
                    unknown: target.is_unknown(),
                    count: 1,
                });
                entry.target_index.insert(target_key, entry.targets.len() - 1);
            }
        }
    }

    pub fn get(&self, source_key: &str) -> Option<&SourceCounts> {
        self.index.get(source_key).map(|&i| &self.sources[i])
    }

    pub fn count(&self, source_key: &str, target_key: &str) -> u64 {
        self.get(source_key)
            .and_then(|s| s.target_index.get(target_key).map(|&i| s.targets[i].count))
            .unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceCounts> {
        self.sources.iter()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Streaming extractor state for one run.
pub struct CandidateExtractor<W: Write> {
    out: CandidateWriter<W>,
    counts: CooccurrenceCounts,
    stats: ExtractStats,
    min_tokens: usize,
}

impl<W: Write> CandidateExtractor<W> {
    pub fn new(out: W, min_tokens: usize) -> Self {
        Self {
            out: CandidateWriter::new(out),
            counts: CooccurrenceCounts::new(),
            stats: ExtractStats::default(),
            min_tokens,
        }
    }

    /// Process the next sentence. Only a failure to write the candidate file
    /// is returned as an error.
    pub fn process(&mut self, group: SentenceGroup<'_>) -> Result<()> {
        self.stats.total += 1;
        let id = self.stats.total;

        match self.examine(id, group) {
            Ok(Outcome::Retained {
                pairs,
                length_mismatch,
            }) => {
                self.out.write(&CandidateRecord {
                    id,
                    source: group.source.trim().to_string(),
                    biltrans: group.biltrans.trim().to_string(),
                    target: group.target.trim().to_string(),
                    alignment: group.alignment.trim().to_string(),
                })?;
                for (source, target) in &pairs {
                    self.counts.add(source, target);
                }
                self.stats.valid += 1;
                if length_mismatch {
                    self.stats.length_mismatches += 1;
                }
            }
            Ok(Outcome::Rejected(reason)) => {
                self.stats.errors += 1;
                match reason {
                    Rejection::Empty => self.stats.empty += 1,
                    Rejection::NotAmbiguous => {
                        debug!(sentence = id, "not ambiguous");
                        self.stats.not_ambiguous += 1;
                    }
                    Rejection::TooShort => {
                        debug!(sentence = id, "fewer than {} tokens on both sides", self.min_tokens);
                        self.stats.too_short += 1;
                    }
                }
            }
            Err(e) => {
                warn!(sentence = id, "error in line: {e}");
                self.stats.errors += 1;
                self.stats.malformed += 1;
            }
        }
        Ok(())
    }

    fn examine(&self, id: usize, group: SentenceGroup<'_>) -> Result<Outcome, SentenceError> {
        if group.source.trim().is_empty() || group.biltrans.trim().is_empty() {
            return Ok(Outcome::Rejected(Rejection::Empty));
        }

        let biltrans = tokenize_biltrans_line(group.biltrans);
        let source = tokenize_tagger_line(group.source);
        let target = tokenize_tagger_line(group.target);

        if !biltrans.iter().any(|t| t.is_ambiguous()) {
            return Ok(Outcome::Rejected(Rejection::NotAmbiguous));
        }
        if source.len() < self.min_tokens && target.len() < self.min_tokens {
            return Ok(Outcome::Rejected(Rejection::TooShort));
        }

        let length_mismatch = source.len() != biltrans.len();
        if length_mismatch {
            warn!(
                sentence = id,
                source = source.len(),
                biltrans = biltrans.len(),
                "source and biltrans token counts differ"
            );
        }

        let alignments = crate::corpus::parse_alignments(group.alignment)?;
        check_bounds(&alignments, source.len(), target.len())?;

        let mut pairs = Vec::new();
        for (i, (sl, bt)) in source.iter().zip(&biltrans).enumerate() {
            if !bt.is_ambiguous() {
                continue;
            }
            for al in alignments.iter().filter(|al| al.source == i) {
                pairs.push((sl.clone(), target[al.target].clone()));
            }
        }

        Ok(Outcome::Retained {
            pairs,
            length_mismatch,
        })
    }

    pub fn stats(&self) -> &ExtractStats {
        &self.stats
    }

    pub fn counts(&self) -> &CooccurrenceCounts {
        &self.counts
    }

    /// Flush the candidate file and hand back the accumulated state.
    pub fn finish(self) -> Result<(CooccurrenceCounts, ExtractStats, W)> {
        let out = self.out.into_inner()?;
        self.stats.log_summary();
        Ok((self.counts, self.stats, out))
    }
}

fn check_bounds(
    alignments: &[AlignmentPair],
    source_len: usize,
    target_len: usize,
) -> Result<(), SentenceError> {
    match alignments
        .iter()
        .find(|al| al.source >= source_len || al.target >= target_len)
    {
        Some(al) => Err(SentenceError::OutOfBounds {
            target_index: al.target,
            source_index: al.source,
            source_len,
            target_len,
        }),
        None => Ok(()),
    }
}

/// Run candidate extraction over four parallel line streams.
///
/// Streams are consumed in lock-step; if one runs out early the remaining
/// lines of the others are ignored with a warning.
pub fn extract<S, B, T, A, W>(
    source: S,
    biltrans: B,
    target: T,
    alignment: A,
    out: W,
    min_tokens: usize,
) -> Result<(CooccurrenceCounts, ExtractStats, W)>
where
    S: BufRead,
    B: BufRead,
    T: BufRead,
    A: BufRead,
    W: Write,
{
    let mut extractor = CandidateExtractor::new(out, min_tokens);
    let mut source = source.lines();
    let mut biltrans = biltrans.lines();
    let mut target = target.lines();
    let mut alignment = alignment.lines();

    loop {
        let next = (source.next(), biltrans.next(), target.next(), alignment.next());
        let (sl, bt, tl, al) = match next {
            (Some(sl), Some(bt), Some(tl), Some(al)) => (sl?, bt?, tl?, al?),
            (None, None, None, None) => break,
            _ => {
                warn!(
                    sentences = extractor.stats().total,
                    "input streams have different lengths, stopping at the shortest"
                );
                break;
            }
        };
        extractor.process(SentenceGroup {
            source: &sl,
            biltrans: &bt,
            target: &tl,
            alignment: &al,
        })?;
    }

    extractor.finish()
}
