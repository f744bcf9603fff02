//! Context features and training events.
//!
//! Every ambiguous occurrence in the candidate file is described by the
//! source-side n-grams around it. Each distinct n-gram text is interned into
//! a [`FeatureTable`] (ids from 1, first-seen order) and the occurrence
//! becomes one [`TrainingEvent`] in the multinomial format read by the
//! maximum-entropy trainer.

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::corpus::{CandidateReader, CandidateRecord};
use crate::error::{LexSelError, Result};
use crate::lexicon::FrequencyLexicon;
use crate::token::TaggedToken;
use crate::utils::word_key;

/// Bidirectional feature interner: text <-> id.
///
/// Ids are handed out from 1 in first-seen order and never reused. Lookups
/// are exact and case-sensitive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureTable {
    /// `texts[id - 1]`
    texts: Vec<String>,
    #[serde(skip)]
    ids: AHashMap<String, u32>,
}

impl FeatureTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of `text`, allocating the next one on first sight.
    pub fn intern(&mut self, text: &str) -> u32 {
        if let Some(&id) = self.ids.get(text) {
            return id;
        }
        self.texts.push(text.to_string());
        let id = self.texts.len() as u32;
        self.ids.insert(text.to_string(), id);
        id
    }

    pub fn id_of(&self, text: &str) -> Option<u32> {
        self.ids.get(text).copied()
    }

    pub fn text_of(&self, id: u32) -> Option<&str> {
        let slot = (id as usize).checked_sub(1)?;
        self.texts.get(slot).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    /// `(id, text)` in id order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.texts
            .iter()
            .enumerate()
            .map(|(i, t)| (i as u32 + 1, t.as_str()))
    }

    /// Write the feature dictionary, `id<TAB>text`, sorted by text.
    pub fn write_to<W: Write>(&self, mut w: W) -> Result<()> {
        let mut rows: Vec<(u32, &str)> = self.iter().collect();
        rows.sort_by(|a, b| a.1.cmp(b.1));
        for (id, text) in rows {
            writeln!(w, "{id}\t{text}")?;
        }
        w.flush()?;
        Ok(())
    }

    /// Read a feature dictionary in any line order. Ids must cover `1..=n`
    /// exactly once; an empty text is allowed.
    pub fn read_from<R: BufRead>(r: R) -> Result<Self> {
        let mut rows: Vec<(u32, String, usize)> = Vec::new();
        for (n, line) in r.lines().enumerate() {
            let line_no = n + 1;
            let line = line?;
            let line = line.trim_end_matches(['\r', '\n']);
            if line.trim().is_empty() {
                continue;
            }
            let (id, text) = line.split_once('\t').unwrap_or((line, ""));
            let id: u32 = id.trim().parse().map_err(|_| LexSelError::MalformedFeatureTable {
                line: line_no,
                reason: format!("bad feature id `{id}`"),
            })?;
            rows.push((id, text.to_string(), line_no));
        }

        rows.sort_by_key(|r| r.0);
        let mut table = Self::new();
        for (expected, (id, text, line_no)) in rows.into_iter().enumerate() {
            if id as usize != expected + 1 {
                return Err(LexSelError::MalformedFeatureTable {
                    line: line_no,
                    reason: format!("expected feature id {}, found {id}", expected + 1),
                });
            }
            if table.ids.contains_key(&text) {
                return Err(LexSelError::MalformedFeatureTable {
                    line: line_no,
                    reason: format!("duplicate feature text `{text}`"),
                });
            }
            table.intern(&text);
        }
        Ok(table)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.write_to(BufWriter::new(File::create(path)?))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::read_from(BufReader::new(File::open(path)?))
    }

    pub fn save_bincode<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(writer, self)?;
        Ok(())
    }

    pub fn load_bincode<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let mut table: Self = bincode::deserialize_from(reader)?;
        table.ids = table
            .texts
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i as u32 + 1))
            .collect();
        Ok(table)
    }
}

fn join_units(tokens: &[TaggedToken]) -> String {
    tokens
        .iter()
        .map(TaggedToken::unit)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Context strings around position `i`: for each window size
/// `w = 1..max_ngrams-1` the preceding, following and centered windows, in
/// that order. Windows are clipped at the sentence edges.
pub fn context_windows(tokens: &[TaggedToken], i: usize, max_ngrams: usize) -> Vec<String> {
    let mut out = Vec::with_capacity(3 * max_ngrams.saturating_sub(1));
    if i >= tokens.len() {
        return out;
    }
    for w in 1..max_ngrams {
        let start = i.saturating_sub(w);
        let end = (i + w + 1).min(tokens.len());
        out.push(join_units(&tokens[start..=i]));
        out.push(join_units(&tokens[i..end]));
        out.push(join_units(&tokens[start..end]));
    }
    out
}

/// One ambiguous occurrence, ready for the trainer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingEvent {
    /// Normalized source word key.
    pub word: String,
    pub num_classes: usize,
    pub outcome: u32,
    /// Active feature ids; repeats are kept.
    pub features: Vec<u32>,
}

impl TrainingEvent {
    /// Trainer body: `outcome # f:0 f:0 # f:1 f:1 # ... #`, the feature list
    /// repeated once per class.
    pub fn body(&self) -> String {
        let mut out = format!("{} #", self.outcome);
        for class in 0..self.num_classes {
            for f in &self.features {
                out.push_str(&format!(" {f}:{class}"));
            }
            out.push_str(" #");
        }
        out
    }
}

impl fmt::Display for TrainingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}\t{}", self.word, self.num_classes, self.body())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventStats {
    pub records: usize,
    pub occurrences: usize,
    pub events: usize,
    pub unknown: usize,
    pub no_default: usize,
    pub not_in_index: usize,
    pub single_class: usize,
    pub bad_records: usize,
}

impl EventStats {
    pub fn log_summary(&self, features: usize) {
        info!(
            records = self.records,
            occurrences = self.occurrences,
            events = self.events,
            features,
            "event extraction finished"
        );
        debug!(
            unknown = self.unknown,
            no_default = self.no_default,
            not_in_index = self.not_in_index,
            single_class = self.single_class,
            bad_records = self.bad_records,
            "skipped occurrences"
        );
    }
}

/// Turns candidate records into training events against a fixed lexicon.
pub struct EventExtractor<'a> {
    lexicon: &'a FrequencyLexicon,
    max_ngrams: usize,
    table: FeatureTable,
    stats: EventStats,
}

impl<'a> EventExtractor<'a> {
    pub fn new(lexicon: &'a FrequencyLexicon, max_ngrams: usize) -> Self {
        Self {
            lexicon,
            max_ngrams,
            table: FeatureTable::new(),
            stats: EventStats::default(),
        }
    }

    /// Events of one record, in source-position then alignment order.
    pub fn process(&mut self, record: &CandidateRecord) -> Vec<TrainingEvent> {
        self.stats.records += 1;
        let mut events = Vec::new();

        let alignments = match record.alignments() {
            Ok(al) => al,
            Err(e) => {
                warn!(sentence = record.id, "{e}");
                self.stats.bad_records += 1;
                return events;
            }
        };
        let source = record.source_tokens();
        let biltrans = record.biltrans_tokens();
        let target = record.target_tokens();

        for (i, (sl, bt)) in source.iter().zip(&biltrans).enumerate() {
            if !bt.is_ambiguous() {
                continue;
            }
            for al in alignments.iter().filter(|al| al.source == i) {
                let Some(tl) = target.get(al.target) else {
                    warn!(sentence = record.id, target = al.target, "alignment outside target sentence");
                    continue;
                };
                self.stats.occurrences += 1;
                if let Some(event) = self.occurrence(record.id, &source, i, sl, tl) {
                    events.push(event);
                }
            }
        }

        self.stats.events += events.len();
        events
    }

    fn occurrence(
        &mut self,
        id: usize,
        source: &[TaggedToken],
        i: usize,
        sl: &TaggedToken,
        tl: &TaggedToken,
    ) -> Option<TrainingEvent> {
        if sl.is_unknown() || tl.is_unknown() {
            self.stats.unknown += 1;
            return None;
        }
        let word = word_key(sl);
        let target = word_key(tl);

        if self.lexicon.default_for(&word).is_none() {
            warn!(sentence = id, "{word} has no default, skipping");
            self.stats.no_default += 1;
            return None;
        }
        let Some(outcome) = self.lexicon.class_id(&word, &target) else {
            warn!(sentence = id, "pair ({word}, {target}) not in index");
            self.stats.not_in_index += 1;
            return None;
        };
        let num_classes = self.lexicon.num_classes(&word);
        if num_classes < 2 {
            self.stats.single_class += 1;
            return None;
        }

        let features = context_windows(source, i, self.max_ngrams)
            .iter()
            .map(|text| self.table.intern(text))
            .collect();
        Some(TrainingEvent {
            word,
            num_classes,
            outcome,
            features,
        })
    }

    pub fn stats(&self) -> &EventStats {
        &self.stats
    }

    pub fn finish(self) -> (FeatureTable, EventStats) {
        self.stats.log_summary(self.table.len());
        (self.table, self.stats)
    }
}

/// Stream a candidate file into an event file, one line per event.
pub fn extract_events<R: BufRead, W: Write>(
    candidates: R,
    lexicon: &FrequencyLexicon,
    max_ngrams: usize,
    mut out: W,
) -> Result<(FeatureTable, EventStats)> {
    let mut extractor = EventExtractor::new(lexicon, max_ngrams);
    for record in CandidateReader::new(candidates) {
        for event in extractor.process(&record?) {
            writeln!(out, "{event}")?;
        }
    }
    out.flush()?;
    Ok(extractor.finish())
}
