//! Weight integration and rule emission.
//!
//! Each trainer weight line names a source word, a feature id and a class
//! id. The feature id resolves to its context n-gram through the
//! [`FeatureTable`], the class id to a target word through the lexicon's
//! reverse index. The resulting candidate rule is validated and rendered as
//! one `<rule>` of the rule document:
//!
//! ```xml
//! <rules>
//!   <rule c="1 1: 1" weight="0.83">
//!     <match lemma="the" tags="det"/>
//!     <match lemma="river" tags="n"><select lemma="río" tags="n"/></match>
//!   </rule>
//! </rules>
//! ```

use std::fmt::Write as _;
use std::io::{BufRead, Write};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::{LexSelError, Result};
use crate::features::FeatureTable;
use crate::lexicon::FrequencyLexicon;
use crate::token::lemma_and_tags;
use crate::trainer::WeightedFeature;
use crate::utils::normalize;

/// Trainer lines carrying this marker are not weights.
pub const TRAINER_MARKER: &str = "@@@";

static DEFAULT_PUNCTUATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<(guio|sent|cm)>").expect("static regex"));

/// Detects punctuation-category tags inside a context pattern.
#[derive(Debug, Clone)]
pub struct PunctuationFilter {
    pattern: Option<Regex>,
}

impl Default for PunctuationFilter {
    fn default() -> Self {
        Self {
            pattern: Some(DEFAULT_PUNCTUATION.clone()),
        }
    }
}

impl PunctuationFilter {
    pub fn new<S: AsRef<str>>(tags: &[S]) -> Result<Self> {
        if tags.is_empty() {
            return Ok(Self { pattern: None });
        }
        let alternatives: Vec<String> = tags.iter().map(|t| regex::escape(t.as_ref())).collect();
        let pattern = Regex::new(&format!("<({})>", alternatives.join("|")))
            .map_err(|e| LexSelError::Config(format!("punctuation tags: {e}")))?;
        Ok(Self {
            pattern: Some(pattern),
        })
    }

    pub fn matches(&self, ngram: &str) -> bool {
        self.pattern.as_ref().is_some_and(|re| re.is_match(ngram))
    }
}

/// Why a candidate rule was not written.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleRejection {
    #[error("punctuation in pattern \"{0}\"")]
    Punctuation(String),

    #[error("pattern \"{0}\" below minmatch")]
    BelowMinMatch(String),

    #[error("source word \"{word}\" not in pattern \"{ngram}\"")]
    SourceNotInPattern { word: String, ngram: String },
}

/// A weight resolved back to text, not yet validated.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRule {
    pub weight: f64,
    pub source: String,
    /// Space-separated context units; empty for the unconditional rule.
    pub ngram: String,
    pub target: String,
}

impl CandidateRule {
    /// Checks in order: punctuation, at least two pattern words, source
    /// word present in the pattern. An empty n-gram passes the last two.
    pub fn validate(&self, punct: &PunctuationFilter) -> std::result::Result<(), RuleRejection> {
        if punct.matches(&self.ngram) {
            return Err(RuleRejection::Punctuation(self.ngram.clone()));
        }
        if self.ngram.is_empty() {
            return Ok(());
        }
        let ngram = normalize(&self.ngram);
        let source = normalize(&self.source);
        let pattern: Vec<&str> = ngram.split(' ').collect();
        if pattern.len() < 2 {
            return Err(RuleRejection::BelowMinMatch(self.ngram.clone()));
        }
        if !pattern.contains(&source.as_str()) {
            return Err(RuleRejection::SourceNotInPattern {
                word: source,
                ngram,
            });
        }
        Ok(())
    }

    /// Render a validated rule. `rule_no` numbers emitted rules, `line_no`
    /// counts every rule considered.
    pub fn render(&self, line_no: usize, rule_no: usize) -> String {
        let source = normalize(&self.source);
        let target = normalize(&self.target);
        let ngram = normalize(&self.ngram);
        let (tl_lemma, tl_tags) = lemma_and_tags(&target);
        let select = format!(
            "<select lemma=\"{}\" tags=\"{}\"/>",
            escape_attr(&tl_lemma),
            escape_attr(&tl_tags)
        );

        let mut out = String::new();
        let _ = writeln!(
            out,
            "  <rule c=\"{rule_no} {line_no}: 1\" weight=\"{}\">",
            self.weight
        );
        if ngram.is_empty() {
            let (sl_lemma, sl_tags) = lemma_and_tags(&source);
            let _ = writeln!(
                out,
                "    <match lemma=\"{}\" tags=\"{}\">{select}</match>",
                escape_attr(&sl_lemma),
                escape_attr(&sl_tags)
            );
        } else {
            let mut selected = false;
            for word in ngram.split(' ') {
                let (lemma, tags) = lemma_and_tags(word);
                out.push_str("    <match ");
                if !lemma.is_empty() {
                    let _ = write!(out, "lemma=\"{}\" ", escape_attr(&lemma));
                }
                let _ = write!(out, "tags=\"{}\"", escape_attr(&tags));
                // only the first occurrence of the source word selects
                if !selected && word == source {
                    selected = true;
                    let _ = writeln!(out, ">{select}</match>");
                } else {
                    out.push_str("/>\n");
                }
            }
        }
        out.push_str("  </rule>\n");
        out
    }
}

pub(crate) fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmitStats {
    pub weight_lines: usize,
    pub malformed: usize,
    pub unknown_feature: usize,
    pub no_default: usize,
    pub not_in_index: usize,
    pub emitted: usize,
    pub rejected: usize,
}

impl EmitStats {
    pub fn log_summary(&self) {
        info!(
            weights = self.weight_lines,
            emitted = self.emitted,
            rejected = self.rejected,
            "rule emission finished"
        );
        debug!(
            malformed = self.malformed,
            unknown_feature = self.unknown_feature,
            no_default = self.no_default,
            not_in_index = self.not_in_index,
            "unresolved weights"
        );
    }
}

/// Destinations of the emitter. Only the rule document is required.
pub struct RuleSinks<'a> {
    pub document: &'a mut dyn Write,
    pub rule_rows: Option<&'a mut dyn Write>,
    pub ngram_rows: Option<&'a mut dyn Write>,
}

impl<'a> RuleSinks<'a> {
    pub fn document_only(document: &'a mut dyn Write) -> Self {
        Self {
            document,
            rule_rows: None,
            ngram_rows: None,
        }
    }
}

/// Streams weight lines into rules.
pub struct RuleEmitter<'a> {
    lexicon: &'a FrequencyLexicon,
    features: &'a FeatureTable,
    punct: &'a PunctuationFilter,
    line_no: usize,
    rule_no: usize,
    stats: EmitStats,
}

impl<'a> RuleEmitter<'a> {
    pub fn new(
        lexicon: &'a FrequencyLexicon,
        features: &'a FeatureTable,
        punct: &'a PunctuationFilter,
    ) -> Self {
        Self {
            lexicon,
            features,
            punct,
            line_no: 1,
            rule_no: 1,
            stats: EmitStats::default(),
        }
    }

    /// Handle one trainer output line. Unresolvable and rejected weights are
    /// logged and counted; only write failures are errors.
    pub fn consume(&mut self, line: &str, sinks: &mut RuleSinks<'_>) -> Result<()> {
        if line.trim().is_empty() || line.contains(TRAINER_MARKER) {
            return Ok(());
        }
        self.stats.weight_lines += 1;

        let weight: WeightedFeature = match line.parse() {
            Ok(w) => w,
            Err(e) => {
                warn!("{e}");
                self.stats.malformed += 1;
                return Ok(());
            }
        };
        let Some(ngram) = self.features.text_of(weight.feature) else {
            warn!(word = %weight.word, feature = weight.feature, "unknown feature id");
            self.stats.unknown_feature += 1;
            return Ok(());
        };

        if let Some(rows) = sinks.rule_rows.as_mut() {
            writeln!(
                rows,
                "{}\t{}\t{}\t{}",
                weight.word, weight.weight, weight.class, ngram
            )?;
        }

        let Some(target) = self.lexicon.target_for(&weight.word, weight.class) else {
            warn!("({}, {}) not in index", weight.word, weight.class);
            self.stats.not_in_index += 1;
            return Ok(());
        };
        if self.lexicon.default_for(&weight.word).is_none() {
            warn!(word = %weight.word, "no default translation, skipping rule");
            self.stats.no_default += 1;
            return Ok(());
        }

        if let Some(rows) = sinks.ngram_rows.as_mut() {
            writeln!(
                rows,
                "+ {}\t{}\t{}\t{}\t1",
                weight.weight, weight.word, ngram, target
            )?;
        }

        let rule = CandidateRule {
            weight: weight.weight,
            source: weight.word.clone(),
            ngram: ngram.to_string(),
            target: target.to_string(),
        };
        match rule.validate(self.punct) {
            Ok(()) => {
                sinks
                    .document
                    .write_all(rule.render(self.line_no, self.rule_no).as_bytes())?;
                self.rule_no += 1;
                self.stats.emitted += 1;
            }
            Err(rejection) => {
                warn!(line = self.line_no, "{rejection}");
                self.stats.rejected += 1;
            }
        }
        self.line_no += 1;
        Ok(())
    }

    pub fn stats(&self) -> &EmitStats {
        &self.stats
    }

    pub fn finish(self) -> EmitStats {
        self.stats.log_summary();
        self.stats
    }
}

/// Write the whole rule document (and the optional row files) from a
/// weight file.
pub fn emit_rules<R: BufRead>(
    lexicon: &FrequencyLexicon,
    features: &FeatureTable,
    punct: &PunctuationFilter,
    weights: R,
    mut sinks: RuleSinks<'_>,
) -> Result<EmitStats> {
    let mut emitter = RuleEmitter::new(lexicon, features, punct);
    writeln!(sinks.document, "<rules>")?;
    for line in weights.lines() {
        emitter.consume(&line?, &mut sinks)?;
    }
    writeln!(sinks.document, "</rules>")?;
    sinks.document.flush()?;
    if let Some(rows) = sinks.rule_rows.as_mut() {
        rows.flush()?;
    }
    if let Some(rows) = sinks.ngram_rows.as_mut() {
        rows.flush()?;
    }
    Ok(emitter.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lexicon() -> FrequencyLexicon {
        let text = "\
5 ^river<n>$ ^río<n>$ @
2 ^river<n>$ ^ribera<n>$
3 ^bank<n>$ ^banco<n>$
";
        FrequencyLexicon::read_from(text.as_bytes()).unwrap()
    }

    fn features() -> FeatureTable {
        let mut table = FeatureTable::new();
        for text in [
            "^the<det>$ ^river<n>$",
            "^river<n>$ ^flows<vblex>$",
            "^river<n>$",
            "^the<det>$ ^bank<n>$",
            "",
            "^dark<adj>$ ^water<n>$",
            "^river<n>$ ^.<sent>$",
        ] {
            table.intern(text);
        }
        table
    }

    fn run(weights: &str) -> (String, String, String, EmitStats) {
        let (lx, ft, punct) = (lexicon(), features(), PunctuationFilter::default());
        let (mut doc, mut rules, mut ngrams) = (Vec::new(), Vec::new(), Vec::new());
        let stats = emit_rules(
            &lx,
            &ft,
            &punct,
            weights.as_bytes(),
            RuleSinks {
                document: &mut doc,
                rule_rows: Some(&mut rules),
                ngram_rows: Some(&mut ngrams),
            },
        )
        .unwrap();
        let s = |b: Vec<u8>| String::from_utf8(b).unwrap();
        (s(doc), s(rules), s(ngrams), stats)
    }

    #[test]
    fn accepted_rule_renders_pattern_with_select() {
        let (doc, _, _, stats) = run("^river<n>$ 1:0 0.83\n");
        assert_eq!(stats.emitted, 1);
        assert_eq!(
            doc,
            "<rules>\n  <rule c=\"1 1: 1\" weight=\"0.83\">\n    \
             <match lemma=\"the\" tags=\"det\"/>\n    \
             <match lemma=\"river\" tags=\"n\"><select lemma=\"río\" tags=\"n\"/></match>\n  \
             </rule>\n</rules>\n"
        );
    }

    #[test]
    fn empty_pattern_yields_unconditional_rule() {
        let (doc, _, _, stats) = run("^river<n>$ 5:1 -0.2\n");
        assert_eq!(stats.emitted, 1);
        assert!(doc.contains(
            "    <match lemma=\"river\" tags=\"n\"><select lemma=\"ribera\" tags=\"n\"/></match>\n"
        ));
    }

    #[test]
    fn sent_tag_in_pattern_is_rejected() {
        let (doc, rules, ngrams, stats) = run("^river<n>$ 7:1 0.83\n");
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.emitted, 0);
        assert_eq!(doc, "<rules>\n</rules>\n");
        // the intermediate rows still record it
        assert_eq!(rules, "^river<n>$\t0.83\t1\t^river<n>$ ^.<sent>$\n");
        assert_eq!(ngrams, "+ 0.83\t^river<n>$\t^river<n>$ ^.<sent>$\t^ribera<n>$\t1\n");
    }

    #[test]
    fn class_outside_reverse_index_is_skipped() {
        let (doc, _, ngrams, stats) = run("^river<n>$ 1:2 0.5\n^river<n>$ 2:0 0.4\n");
        assert_eq!(stats.not_in_index, 1);
        assert_eq!(stats.emitted, 1);
        assert_eq!(ngrams.lines().count(), 1);
        assert!(doc.contains("c=\"1 1: 1\" weight=\"0.4\""));
    }

    #[test]
    fn rejections_advance_line_counter_only() {
        let (doc, _, _, stats) = run(
            "^river<n>$ 3:0 1.5\n\
             ^river<n>$ 6:0 1.0\n\
             @@@ trainer banner\n\
             ^river<n>$ 2:1 0.25\n",
        );
        assert_eq!(stats.rejected, 2);
        assert_eq!(stats.emitted, 1);
        assert_eq!(stats.weight_lines, 3);
        assert!(doc.contains("c=\"1 3: 1\" weight=\"0.25\""));
    }

    #[test]
    fn word_without_default_gets_no_rule() {
        let (doc, _, _, stats) = run("^bank<n>$ 4:0 0.9\n");
        assert_eq!(stats.no_default, 1);
        assert_eq!(doc, "<rules>\n</rules>\n");

        // nor an unconditional one from the empty pattern
        let (doc, rules, ngrams, stats) = run("^bank<n>$ 5:0 0.9\n");
        assert_eq!(stats.no_default, 1);
        assert_eq!(stats.emitted, 0);
        assert_eq!(doc, "<rules>\n</rules>\n");
        assert_eq!(rules, "^bank<n>$\t0.9\t0\t\n");
        assert!(ngrams.is_empty());
    }

    #[test]
    fn repeated_source_word_selects_once() {
        let lexicon =
            FrequencyLexicon::read_from("3 ^very<adv>$ ^muy<adv>$ @\n1 ^very<adv>$ ^mismo<adv>$\n".as_bytes())
                .unwrap();
        let mut features = FeatureTable::new();
        features.intern("^very<adv>$ ^very<adv>$ ^good<adj>$");

        let mut doc = Vec::new();
        let stats = emit_rules(
            &lexicon,
            &features,
            &PunctuationFilter::default(),
            "^very<adv>$ 1:0 0.5\n".as_bytes(),
            RuleSinks::document_only(&mut doc),
        )
        .unwrap();
        let doc = String::from_utf8(doc).unwrap();

        assert_eq!(stats.emitted, 1);
        assert_eq!(doc.matches("<select ").count(), 1);
        assert_eq!(
            doc,
            "<rules>\n  <rule c=\"1 1: 1\" weight=\"0.5\">\n    \
             <match lemma=\"very\" tags=\"adv\"><select lemma=\"muy\" tags=\"adv\"/></match>\n    \
             <match lemma=\"very\" tags=\"adv\"/>\n    \
             <match lemma=\"good\" tags=\"adj\"/>\n  \
             </rule>\n</rules>\n"
        );
    }

    #[test]
    fn unresolvable_weight_lines_do_not_stop_the_run() {
        let (_, _, _, stats) = run("garbage\n^river<n>$ 99:0 0.1\n^river<n>$ 1:1 0.3\n");
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.unknown_feature, 1);
        assert_eq!(stats.emitted, 1);
    }

    #[test]
    fn validation_properties() {
        let punct = PunctuationFilter::default();
        let rule = |ngram: &str| CandidateRule {
            weight: 1.0,
            source: "^river<n>$".into(),
            ngram: ngram.into(),
            target: "^río<n>$".into(),
        };
        assert_eq!(rule("").validate(&punct), Ok(()));
        assert!(matches!(
            rule("^river<n>$").validate(&punct),
            Err(RuleRejection::BelowMinMatch(_))
        ));
        assert!(matches!(
            rule("^,<cm>$").validate(&punct),
            Err(RuleRejection::Punctuation(_))
        ));
        assert!(matches!(
            rule("^a<det>$ ^lake<n>$").validate(&punct),
            Err(RuleRejection::SourceNotInPattern { .. })
        ));
        assert_eq!(rule("^The<det>$ ^River<n>$").validate(&punct), Ok(()));
    }

    #[test]
    fn custom_punctuation_tags() {
        let punct = PunctuationFilter::new(&["lpar", "rpar"][..]).unwrap();
        assert!(punct.matches("^(<lpar>$ ^x<n>$"));
        assert!(!punct.matches("^.<sent>$"));
        let none = PunctuationFilter::new::<&str>(&[]).unwrap();
        assert!(!none.matches("^.<sent>$"));
    }

    #[test]
    fn attributes_are_escaped() {
        assert_eq!(escape_attr("a&\"b\"<c>"), "a&amp;&quot;b&quot;&lt;c&gt;");
        let rule = CandidateRule {
            weight: 0.5,
            source: "^at&t<np>$".into(),
            ngram: String::new(),
            target: "^at&t<np>$".into(),
        };
        assert!(rule.render(1, 1).contains("lemma=\"at&amp;t\""));
    }
}
