//! Candidate-file records and alignment pairs.
//!
//! The candidate file is the hand-off between candidate extraction and event
//! extraction. Each retained sentence is stored as five lines:
//!
//! ```text
//! 17<TAB>^the<det>$ ^bank<n>$
//! 17<TAB>^the<det>/el<det>$ ^bank<n>/banco<n>/ribera<n>$
//! 17<TAB>^el<det>$ ^banco<n>$
//! 17<TAB>0-0 1-1
//! --------------------------------------------------------------------------------
//! ```
//!
//! Alignment pairs are written `target-source`.

use std::io::{self, BufRead, Write};
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::error::Result;
use crate::token::{tokenize_biltrans_line, tokenize_tagger_line, BiltransToken, TaggedToken};

pub const SEPARATOR_WIDTH: usize = 80;

static AFTER_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$.*?\^").expect("static regex"));

/// One token-index correspondence between target and source positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlignmentPair {
    pub target: usize,
    pub source: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("bad alignment pair `{0}`")]
pub struct AlignmentParseError(pub String);

impl FromStr for AlignmentPair {
    type Err = AlignmentParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || AlignmentParseError(s.to_string());
        let (target, source) = s.split_once('-').ok_or_else(bad)?;
        Ok(Self {
            target: target.trim().parse().map_err(|_| bad())?,
            source: source.trim().parse().map_err(|_| bad())?,
        })
    }
}

/// Parse a whitespace-separated list of `target-source` pairs.
pub fn parse_alignments(line: &str) -> Result<Vec<AlignmentPair>, AlignmentParseError> {
    line.split_whitespace().map(str::parse).collect()
}

/// One retained sentence, kept as the raw stream lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateRecord {
    pub id: usize,
    pub source: String,
    pub biltrans: String,
    pub target: String,
    pub alignment: String,
}

impl CandidateRecord {
    pub fn source_tokens(&self) -> Vec<TaggedToken> {
        tokenize_tagger_line(&self.source)
    }

    pub fn biltrans_tokens(&self) -> Vec<BiltransToken> {
        tokenize_biltrans_line(&self.biltrans)
    }

    pub fn target_tokens(&self) -> Vec<TaggedToken> {
        tokenize_tagger_line(&self.target)
    }

    pub fn alignments(&self) -> Result<Vec<AlignmentPair>, AlignmentParseError> {
        parse_alignments(&self.alignment)
    }
}

pub struct CandidateWriter<W: Write> {
    inner: W,
    separator: String,
}

impl<W: Write> CandidateWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            separator: "-".repeat(SEPARATOR_WIDTH),
        }
    }

    pub fn write(&mut self, record: &CandidateRecord) -> io::Result<()> {
        let id = record.id;
        writeln!(self.inner, "{id}\t{}", record.source)?;
        writeln!(self.inner, "{id}\t{}", record.biltrans)?;
        writeln!(self.inner, "{id}\t{}", record.target)?;
        writeln!(self.inner, "{id}\t{}", record.alignment)?;
        writeln!(self.inner, "{}", self.separator)
    }

    pub fn into_inner(mut self) -> io::Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// Streams records back out of a candidate file.
///
/// A truncated or garbled trailing record ends the stream with a warning;
/// only I/O failures are returned as errors.
pub struct CandidateReader<R: BufRead> {
    lines: io::Lines<R>,
    line_no: usize,
    done: bool,
}

impl<R: BufRead> CandidateReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line_no: 0,
            done: false,
        }
    }

    fn next_line(&mut self) -> Option<io::Result<String>> {
        let line = self.lines.next()?;
        self.line_no += 1;
        Some(line)
    }

    fn read_record(&mut self) -> Option<Result<CandidateRecord>> {
        let mut fields: Vec<(usize, String)> = Vec::with_capacity(4);
        for slot in 0..5 {
            let line = match self.next_line() {
                Some(Ok(line)) => line,
                Some(Err(e)) => return Some(Err(e.into())),
                None => {
                    if slot > 0 {
                        warn!(line = self.line_no, "truncated candidate record at end of file");
                    }
                    return None;
                }
            };
            if slot == 4 {
                break;
            }
            let parsed = line
                .split_once('\t')
                .and_then(|(id, rest)| Some((id.trim().parse::<usize>().ok()?, rest.trim().to_string())));
            match parsed {
                Some(field) => fields.push(field),
                None => {
                    warn!(line = self.line_no, "malformed candidate line, stopping");
                    return None;
                }
            }
        }

        let id = fields[0].0;
        let mut texts = fields.into_iter().map(|(_, text)| text);
        Some(Ok(CandidateRecord {
            id,
            source: texts.next().unwrap_or_default(),
            biltrans: texts.next().unwrap_or_default(),
            target: texts.next().unwrap_or_default(),
            alignment: texts.next().unwrap_or_default(),
        }))
    }
}

impl<R: BufRead> Iterator for CandidateReader<R> {
    type Item = Result<CandidateRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = self.read_record();
        if !matches!(item, Some(Ok(_))) {
            self.done = true;
        }
        item
    }
}

/// Prepare a tagged line for the aligner: spaces inside lemmas become `~`
/// and whatever sits between two units collapses to a single space.
pub fn clean_tagged_line(line: &str) -> String {
    let line = line.trim_end_matches(['\n', '\r']).replace(' ', "~");
    AFTER_END.replace_all(&line, "$$ ^").into_owned()
}

/// Whether a sentence pair carries any analysis at all.
pub fn has_tags(source: &str, target: &str) -> bool {
    source.contains('<') || target.contains('<')
}
