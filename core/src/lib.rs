//! lexsel-core
//!
//! Learns weighted lexical-selection rules for a rule-based translation
//! engine from a word-aligned bilingual corpus.
//!
//! The stages run strictly left to right and hand over through files:
//!
//! - `extract`: walks the four parallel corpus streams, keeps sentences with
//!   an ambiguous word, and counts aligned translations.
//! - `lexicon`: ranks those counts into a frequency lexicon with a default
//!   translation per word and dense per-word class ids.
//! - `features`: turns every ambiguous occurrence into context n-gram
//!   features and one multinomial training event.
//! - `trainer`: hands the events, one source word at a time, to an external
//!   maximum-entropy estimator and collects its weights.
//! - `rules`: resolves the weights back to text and writes the rule document.
//!
//! `defaults` builds the dictionary-driven default rules for closed
//! categories and `pipeline` chains the stages over a data directory.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub mod error;
pub use error::{LexSelError, Result};

pub mod token;
pub use token::{tokenize_biltrans_line, tokenize_tagger_line, BiltransToken, TaggedToken};

pub mod corpus;
pub use corpus::{AlignmentPair, CandidateReader, CandidateRecord, CandidateWriter};

pub mod extract;
pub use extract::{CandidateExtractor, CooccurrenceCounts, ExtractStats, SentenceGroup};

pub mod lexicon;
pub use lexicon::{FrequencyLexicon, LexiconConflict};

pub mod features;
pub use features::{EventExtractor, EventStats, FeatureTable, TrainingEvent};

pub mod trainer;
pub use trainer::{EventPartition, ExternalTool, Trainer, WeightedFeature, YasmetTrainer};

pub mod rules;
pub use rules::{CandidateRule, EmitStats, PunctuationFilter, RuleRejection};

pub mod defaults;
pub use defaults::DefaultRule;

pub mod pipeline;
pub use pipeline::{CorpusInputs, Pipeline, RunSummary};

/// External maximum-entropy trainer settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Path or name of the `yasmet` binary.
    pub program: PathBuf,
    /// Run the `-red` feature-reduction stage before estimation.
    pub reduce: bool,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("yasmet"),
            reduce: true,
        }
    }
}

/// Settings for one learning run.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Prefix of intermediate file names (e.g. `europarl-v7`)
    pub corpus_name: String,
    pub source_lang: String,
    pub target_lang: String,
    /// Names the final rule document
    pub corpus_pair_name: String,
    /// Directory holding every intermediate file
    pub data_dir: PathBuf,

    /// Context windows run from 1 to `max_ngrams - 1` tokens on each side.
    pub max_ngrams: usize,
    /// Categories that never get a dictionary-driven global default.
    pub open_categories: Vec<String>,
    /// Tags that disqualify a context pattern.
    pub punctuation_tags: Vec<String>,
    /// Sentences with fewer tokens than this on both sides are dropped.
    pub min_tokens: usize,

    pub trainer: TrainerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            corpus_name: "europarl-v7".to_string(),
            source_lang: "en".to_string(),
            target_lang: "es".to_string(),
            corpus_pair_name: "es-en".to_string(),
            data_dir: PathBuf::from("data"),
            max_ngrams: 3,
            open_categories: vec!["n".into(), "vblex".into(), "adj".into()],
            punctuation_tags: vec!["guio".into(), "sent".into(), "cm".into()],
            min_tokens: 2,
            trainer: TrainerConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load_toml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_toml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = self.to_toml_string()?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_ngrams < 2 {
            return Err(LexSelError::Config(format!(
                "max_ngrams must be at least 2, got {}",
                self.max_ngrams
            )));
        }
        if self.source_lang.is_empty() || self.target_lang.is_empty() {
            return Err(LexSelError::Config("language codes must not be empty".into()));
        }
        Ok(())
    }

    /// `source-target`, e.g. `en-es`.
    pub fn pair(&self) -> String {
        format!("{}-{}", self.source_lang, self.target_lang)
    }

    /// Reduction threshold handed to the trainer; also names the rule document.
    pub fn min_ngrams(&self) -> usize {
        self.max_ngrams * 2 - 1
    }

    pub fn paths(&self) -> DataPaths {
        DataPaths::new(self)
    }
}

/// Locations of every intermediate file of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    pub data_dir: PathBuf,
    pub candidates: PathBuf,
    pub lexicon: PathBuf,
    pub global_defaults: PathBuf,
    /// Working directory of the learning stages.
    pub learn_dir: PathBuf,
    pub events: PathBuf,
    pub features: PathBuf,
    pub weights: PathBuf,
    pub rule_rows: PathBuf,
    pub ngram_rows: PathBuf,
    pub rules: PathBuf,
}

impl DataPaths {
    fn new(config: &Config) -> Self {
        let pair = config.pair();
        let data_dir = config.data_dir.clone();
        let learn_dir = data_dir.join(format!("yasmet.{pair}"));
        Self {
            candidates: data_dir.join(format!("{}.candidates.{pair}", config.corpus_name)),
            lexicon: data_dir.join(format!("{}.lex.{pair}", config.corpus_name)),
            global_defaults: data_dir.join(format!("global-defaults.{pair}.lrx")),
            events: learn_dir.join("events"),
            features: learn_dir.join("ngrams"),
            weights: learn_dir.join("all-lambdas"),
            rule_rows: learn_dir.join("rules-all.txt"),
            ngram_rows: learn_dir.join("ngrams-all.txt"),
            rules: learn_dir.join(format!(
                "{}.ngrams-lm-{}.xml",
                config.corpus_pair_name,
                config.min_ngrams()
            )),
            learn_dir,
            data_dir,
        }
    }
}

/// Utility helpers.
pub mod utils {
    use crate::token::TaggedToken;

    /// NFC-normalize and lower-case.
    pub fn normalize(s: &str) -> String {
        use unicode_normalization::UnicodeNormalization;
        s.nfc().collect::<String>().to_lowercase()
    }

    /// Lexicon key of a token: the normalized unit, `^bank<n>$`.
    pub fn word_key(token: &TaggedToken) -> String {
        normalize(&token.unit())
    }

    /// Category (first tag) as used for compatibility checks.
    pub fn category(token: &TaggedToken) -> Option<String> {
        token.first_tag().map(normalize)
    }

    /// Formats `part` as a percentage of `total`, `0.0` for an empty total.
    pub fn percent(part: usize, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            part as f64 * 100.0 / total as f64
        }
    }
}
