//! Hand-off to the external maximum-entropy trainer.
//!
//! The trainer works on one source word at a time: the event file is
//! partitioned by word, each partition is written to a temporary input file
//! headed by the class count, and the trainer's `featureId:classId weight`
//! output lines are collected into a single weight file prefixed with the
//! word they belong to.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::str::FromStr;

use tracing::{debug, info, warn};

use crate::error::{LexSelError, Result};

/// Anything that turns one word's event file into weight lines.
pub trait Trainer {
    fn train(&self, input: &Path, output: &Path) -> Result<()>;
}

/// A program run synchronously with file-backed stdin and stdout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalTool {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl ExternalTool {
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    fn name(&self) -> String {
        self.program.display().to_string()
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }

    /// Run to completion; a non-zero exit status is an error.
    pub fn invoke(&self, stdin: &Path, stdout: &Path) -> Result<()> {
        let input = File::open(stdin)?;
        let output = File::create(stdout)?;
        debug!(tool = %self.name(), args = ?self.args, "running");
        let status = self
            .command()
            .stdin(Stdio::from(input))
            .stdout(Stdio::from(output))
            .status()
            .map_err(|source| LexSelError::ExternalToolSpawn {
                tool: self.name(),
                source,
            })?;
        if !status.success() {
            return Err(LexSelError::ExternalTool {
                tool: self.name(),
                status,
            });
        }
        Ok(())
    }
}

/// `yasmet -red <min> | yasmet`, or a single `yasmet` stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YasmetTrainer {
    pub program: PathBuf,
    pub min_ngrams: usize,
    pub reduce: bool,
}

impl YasmetTrainer {
    pub fn new<P: Into<PathBuf>>(program: P, min_ngrams: usize, reduce: bool) -> Self {
        Self {
            program: program.into(),
            min_ngrams,
            reduce,
        }
    }

    fn reduction(&self) -> ExternalTool {
        ExternalTool::new(&self.program)
            .arg("-red")
            .arg(self.min_ngrams.to_string())
    }

    fn estimation(&self) -> ExternalTool {
        ExternalTool::new(&self.program)
    }
}

impl Trainer for YasmetTrainer {
    fn train(&self, input: &Path, output: &Path) -> Result<()> {
        if !self.reduce {
            return self.estimation().invoke(input, output);
        }

        let reduce = self.reduction();
        let estimate = self.estimation();
        let spawn_error = |tool: &ExternalTool| {
            let name = tool.name();
            move |source: io::Error| LexSelError::ExternalToolSpawn { tool: name, source }
        };

        let mut first = reduce
            .command()
            .stdin(Stdio::from(File::open(input)?))
            .stdout(Stdio::piped())
            .spawn()
            .map_err(spawn_error(&reduce))?;
        let piped = first.stdout.take().ok_or_else(|| LexSelError::ExternalToolSpawn {
            tool: reduce.name(),
            source: io::Error::new(io::ErrorKind::BrokenPipe, "stdout not captured"),
        })?;

        let second = estimate
            .command()
            .stdin(Stdio::from(piped))
            .stdout(Stdio::from(File::create(output)?))
            .status()
            .map_err(spawn_error(&estimate));
        let first_status = first.wait().map_err(spawn_error(&reduce))?;
        let second_status = second?;

        if !first_status.success() {
            return Err(LexSelError::ExternalTool {
                tool: reduce.name(),
                status: first_status,
            });
        }
        if !second_status.success() {
            return Err(LexSelError::ExternalTool {
                tool: estimate.name(),
                status: second_status,
            });
        }
        Ok(())
    }
}

/// Events of one source word.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WordEvents {
    pub num_classes: usize,
    /// Event bodies, without the word and class-count columns.
    pub events: Vec<String>,
}

/// Event file grouped by source word, in word order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventPartition {
    words: BTreeMap<String, WordEvents>,
}

impl EventPartition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, word: &str, num_classes: usize, body: &str) {
        let entry = self
            .words
            .entry(word.to_string())
            .or_insert_with(|| WordEvents {
                num_classes,
                events: Vec::new(),
            });
        if entry.num_classes != num_classes {
            warn!(word = %word, "class count changed from {} to {num_classes}", entry.num_classes);
        }
        entry.events.push(body.to_string());
    }

    /// Lines that do not have exactly three tab-separated columns are ignored.
    pub fn read_from<R: BufRead>(r: R) -> Result<Self> {
        let mut partition = Self::new();
        for line in r.lines() {
            let line = line?;
            let parts: Vec<&str> = line.trim().split('\t').collect();
            let &[word, count, body] = parts.as_slice() else {
                continue;
            };
            match count.parse() {
                Ok(n) => partition.push(word, n, body),
                Err(_) => warn!(word = %word, "bad class count `{count}`"),
            }
        }
        Ok(partition)
    }

    pub fn get(&self, word: &str) -> Option<&WordEvents> {
        self.words.get(word)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &WordEvents)> {
        self.words.iter().map(|(w, e)| (w.as_str(), e))
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// Malformed trainer output line.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("bad weight line `{0}`")]
pub struct WeightParseError(pub String);

/// One learned coefficient: `word featureId:classId weight`.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedFeature {
    pub word: String,
    pub feature: u32,
    pub class: u32,
    pub weight: f64,
}

impl FromStr for WeightedFeature {
    type Err = WeightParseError;

    fn from_str(line: &str) -> std::result::Result<Self, Self::Err> {
        let bad = || WeightParseError(line.trim().to_string());
        let mut parts = line.split_whitespace();
        let (Some(word), Some(pair), Some(weight), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(bad());
        };
        let (feature, class) = pair.split_once(':').ok_or_else(bad)?;
        Ok(Self {
            word: word.to_string(),
            feature: feature.parse().map_err(|_| bad())?,
            class: class.parse().map_err(|_| bad())?,
            weight: weight.parse().map_err(|_| bad())?,
        })
    }
}

/// File-name form of a word: `^some#~word<n>$` -> `some_word<n>`.
pub fn safe_file_stem(word: &str) -> String {
    word.replace(['^', '$'], "")
        .replace('*', ".")
        .replace("#~", "_")
        .replace('/', "_")
}

/// Removes the per-word scratch files when dropped.
struct ScratchFiles(Vec<PathBuf>);

impl Drop for ScratchFiles {
    fn drop(&mut self) {
        for path in &self.0 {
            if let Err(e) = fs::remove_file(path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %path.display(), "could not remove scratch file: {e}");
                }
            }
        }
    }
}

/// Train every word of `partition` and write the prefixed weight lines to
/// `out`. Returns the number of weight lines written.
pub fn learn_weights<W: Write>(
    partition: &EventPartition,
    trainer: &dyn Trainer,
    work_dir: &Path,
    mut out: W,
) -> Result<usize> {
    let mut written = 0;
    for (word, events) in partition.iter() {
        let stem = safe_file_stem(word);
        let input = work_dir.join(format!("tmp.yasmet.{stem}"));
        let output = work_dir.join(format!("tmp.lambdas.{stem}"));
        let _scratch = ScratchFiles(vec![input.clone(), output.clone()]);

        {
            let mut w = BufWriter::new(File::create(&input)?);
            writeln!(w, "{}", events.num_classes)?;
            for body in &events.events {
                writeln!(w, "{body}")?;
            }
            w.flush()?;
        }

        debug!(word = %word, events = events.events.len(), "training");
        trainer.train(&input, &output)?;

        let reader = BufReader::new(File::open(&output)?);
        for line in reader.lines() {
            let line = line?;
            writeln!(out, "{word} {line}")?;
            written += 1;
        }
    }
    out.flush()?;
    info!(words = partition.len(), weights = written, "weights learned");
    Ok(written)
}
