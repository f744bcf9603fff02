//! Stage chaining over one data directory.
//!
//! Each stage reads the files the previous one wrote, so any stage can be
//! rerun on its own. Tagging, cleaning and alignment happen before this and
//! are not driven from here.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::defaults::{global_defaults, write_global_defaults};
use crate::extract::{extract, ExtractStats};
use crate::features::{extract_events, EventStats, FeatureTable};
use crate::lexicon::FrequencyLexicon;
use crate::rules::{emit_rules, EmitStats, PunctuationFilter, RuleSinks};
use crate::trainer::{learn_weights, EventPartition, Trainer, YasmetTrainer};
use crate::{Config, DataPaths};

/// The four parallel, line-aligned corpus streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusInputs {
    pub source: PathBuf,
    pub biltrans: PathBuf,
    pub target: PathBuf,
    pub alignment: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub extract: ExtractStats,
    pub lexicon_words: usize,
    pub events: EventStats,
    pub features: usize,
    pub weights: usize,
    pub rules: EmitStats,
}

fn open(path: &Path) -> Result<BufReader<File>> {
    let f = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    Ok(BufReader::new(f))
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    let f = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    Ok(BufWriter::new(f))
}

pub struct Pipeline {
    config: Config,
    paths: DataPaths,
    punct: PunctuationFilter,
}

impl Pipeline {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let paths = config.paths();
        fs::create_dir_all(&paths.learn_dir)
            .with_context(|| format!("creating {}", paths.learn_dir.display()))?;
        let punct = PunctuationFilter::new(config.punctuation_tags.as_slice())?;
        Ok(Self {
            config,
            paths,
            punct,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn paths(&self) -> &DataPaths {
        &self.paths
    }

    /// Trainer built from the `[trainer]` settings.
    pub fn default_trainer(&self) -> YasmetTrainer {
        YasmetTrainer::new(
            &self.config.trainer.program,
            self.config.min_ngrams(),
            self.config.trainer.reduce,
        )
    }

    /// Corpus streams -> candidate file + frequency lexicon.
    pub fn extract_candidates(&self, inputs: &CorpusInputs) -> Result<(ExtractStats, FrequencyLexicon)> {
        let out = create(&self.paths.candidates)?;
        let (counts, stats, _) = extract(
            open(&inputs.source)?,
            open(&inputs.biltrans)?,
            open(&inputs.target)?,
            open(&inputs.alignment)?,
            out,
            self.config.min_tokens,
        )
        .context("extracting candidates")?;

        let lexicon = FrequencyLexicon::from_counts(&counts);
        lexicon
            .save(&self.paths.lexicon)
            .with_context(|| format!("writing {}", self.paths.lexicon.display()))?;
        Ok((stats, lexicon))
    }

    /// Candidate file + lexicon -> event file + feature dictionary.
    pub fn extract_events(&self) -> Result<(EventStats, FeatureTable)> {
        let lexicon = self.load_lexicon()?;
        let (table, stats) = extract_events(
            open(&self.paths.candidates)?,
            &lexicon,
            self.config.max_ngrams,
            create(&self.paths.events)?,
        )
        .context("extracting events")?;
        table
            .save(&self.paths.features)
            .with_context(|| format!("writing {}", self.paths.features.display()))?;
        Ok((stats, table))
    }

    /// Event file -> weight file. Returns the number of weight lines.
    pub fn learn_weights(&self, trainer: &dyn Trainer) -> Result<usize> {
        let partition = EventPartition::read_from(open(&self.paths.events)?)
            .with_context(|| format!("reading {}", self.paths.events.display()))?;
        let written = learn_weights(
            &partition,
            trainer,
            &self.paths.learn_dir,
            create(&self.paths.weights)?,
        )
        .context("learning weights")?;
        Ok(written)
    }

    /// Weight file + feature dictionary + lexicon -> rule rows and rule document.
    pub fn emit_rules(&self) -> Result<EmitStats> {
        let lexicon = self.load_lexicon()?;
        let features = FeatureTable::load(&self.paths.features)
            .with_context(|| format!("reading {}", self.paths.features.display()))?;

        let mut document = create(&self.paths.rules)?;
        let mut rule_rows = create(&self.paths.rule_rows)?;
        let mut ngram_rows = create(&self.paths.ngram_rows)?;
        let stats = emit_rules(
            &lexicon,
            &features,
            &self.punct,
            open(&self.paths.weights)?,
            RuleSinks {
                document: &mut document,
                rule_rows: Some(&mut rule_rows),
                ngram_rows: Some(&mut ngram_rows),
            },
        )
        .context("emitting rules")?;
        info!(path = %self.paths.rules.display(), "rule document written");
        Ok(stats)
    }

    /// Translated dictionary expansions -> global-defaults rule document.
    pub fn global_defaults(&self, ambiguous: &Path, unambiguous: &Path) -> Result<usize> {
        let rules = global_defaults(
            open(ambiguous)?,
            open(unambiguous)?,
            self.config.open_categories.as_slice(),
        )?;
        write_global_defaults(&rules, create(&self.paths.global_defaults)?)
            .with_context(|| format!("writing {}", self.paths.global_defaults.display()))?;
        Ok(rules.len())
    }

    /// All four core stages in order.
    pub fn run(&self, inputs: &CorpusInputs, trainer: &dyn Trainer) -> Result<RunSummary> {
        let (extract, lexicon) = self.extract_candidates(inputs)?;
        let (events, features) = self.extract_events()?;
        let weights = self.learn_weights(trainer)?;
        let rules = self.emit_rules()?;
        Ok(RunSummary {
            extract,
            lexicon_words: lexicon.len(),
            events,
            features: features.len(),
            weights,
            rules,
        })
    }

    fn load_lexicon(&self) -> Result<FrequencyLexicon> {
        FrequencyLexicon::read_from(open(&self.paths.lexicon)?)
            .with_context(|| format!("reading {}", self.paths.lexicon.display()))
    }
}
