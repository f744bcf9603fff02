//! Dictionary-driven default rules.
//!
//! Closed-category words (prepositions, determiners, ...) take their default
//! translation from the bilingual dictionary rather than from the corpus.
//! The dictionary expansion is translated twice by an external tool, once
//! keeping every candidate and once with the dictionary's own preference;
//! each ambiguous closed-category entry becomes one unconditional rule.

use std::collections::BTreeSet;
use std::io::{BufRead, Write};

use tracing::{debug, info};

use crate::error::Result;
use crate::rules::escape_attr;
use crate::token::tokenize_biltrans_line;

/// One unconditional `<match><select/></match>` rule.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DefaultRule {
    pub source_lemma: String,
    /// Dot-joined, `n.sg`
    pub source_tags: String,
    pub target_lemma: String,
    pub target_tags: String,
}

impl DefaultRule {
    pub fn render(&self) -> String {
        format!(
            "  <rule><match lemma=\"{}\" tags=\"{}\"><select lemma=\"{}\" tags=\"{}\"/></match></rule>",
            escape_attr(&self.source_lemma),
            escape_attr(&self.source_tags),
            escape_attr(&self.target_lemma),
            escape_attr(&self.target_tags)
        )
    }
}

/// Turn one line of the dictionary expansion, `surface:analysis` (with
/// optional `:>:` / `:<:` direction markers), into a `^analysis$` unit.
/// Regular-expression entries yield `None`.
pub fn expanded_entry_unit(line: &str) -> Option<String> {
    if line.contains("REGEXP") {
        return None;
    }
    let line = line.trim().replace(":>:", ":").replace(":<:", ":");
    let analysis = line.split(':').nth(1)?;
    Some(format!("^{analysis}$"))
}

/// Default rule for one pair of translated entries, if the entry is
/// ambiguous and belongs to no open category.
pub fn default_rule<S: AsRef<str>>(ambiguous: &str, unambiguous: &str, open_categories: &[S]) -> Option<DefaultRule> {
    let ambig = tokenize_biltrans_line(ambiguous);
    let unambig = tokenize_biltrans_line(unambiguous);

    let candidates: usize = ambig.iter().chain(&unambig).map(|t| t.candidates.len()).sum();
    if candidates < 3 {
        return None;
    }
    let open = ambig.iter().chain(&unambig).any(|t| {
        std::iter::once(&t.source)
            .chain(&t.candidates)
            .any(|a| open_categories.iter().any(|c| a.has_tag(c.as_ref())))
    });
    if open {
        return None;
    }

    let first = ambig.first()?;
    let target = first.candidates.first()?;
    Some(DefaultRule {
        source_lemma: first.source.lemma().to_string(),
        source_tags: first.source.dotted_tags(),
        target_lemma: target.lemma().to_string(),
        target_tags: target.dotted_tags(),
    })
}

/// Collect the distinct default rules of two parallel translation streams,
/// sorted by lower-cased source lemma.
pub fn global_defaults<A, U, S>(ambiguous: A, unambiguous: U, open_categories: &[S]) -> Result<Vec<DefaultRule>>
where
    A: BufRead,
    U: BufRead,
    S: AsRef<str>,
{
    let mut rules = BTreeSet::new();
    let mut entries = 0usize;
    for (ambig, unambig) in ambiguous.lines().zip(unambiguous.lines()) {
        let (ambig, unambig) = (ambig?, unambig?);
        entries += 1;
        if let Some(rule) = default_rule(ambig.trim(), unambig.trim(), open_categories) {
            rules.insert(rule);
        }
    }

    let mut rules: Vec<DefaultRule> = rules.into_iter().collect();
    rules.sort_by_cached_key(|r| r.source_lemma.to_lowercase());
    debug!(entries, "dictionary entries scanned");
    info!(rules = rules.len(), "global defaults collected");
    Ok(rules)
}

pub fn write_global_defaults<W: Write>(rules: &[DefaultRule], mut out: W) -> Result<()> {
    writeln!(out, "<rules>")?;
    for rule in rules {
        writeln!(out, "{}", rule.render())?;
    }
    writeln!(out, "</rules>")?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPEN: &[&str] = &["n", "vblex", "adj"];

    #[test]
    fn expansion_lines_become_units() {
        assert_eq!(
            expanded_entry_unit("in:in<pr>").as_deref(),
            Some("^in<pr>$")
        );
        assert_eq!(
            expanded_entry_unit("houses:>:house<n><pl>\n").as_deref(),
            Some("^house<n><pl>$")
        );
        assert_eq!(expanded_entry_unit("x:<:y<adv>").as_deref(), Some("^y<adv>$"));
        assert_eq!(expanded_entry_unit("__REGEXP__:x"), None);
        assert_eq!(expanded_entry_unit("nocolon"), None);
    }

    #[test]
    fn closed_ambiguous_entry_gives_rule() {
        let rule = default_rule("^in<pr>/en<pr>/dentro de<pr>$", "^in<pr>/en<pr>$", OPEN).unwrap();
        assert_eq!(
            rule,
            DefaultRule {
                source_lemma: "in".into(),
                source_tags: "pr".into(),
                target_lemma: "en".into(),
                target_tags: "pr".into(),
            }
        );
        assert_eq!(
            rule.render(),
            "  <rule><match lemma=\"in\" tags=\"pr\"><select lemma=\"en\" tags=\"pr\"/></match></rule>"
        );
    }

    #[test]
    fn open_or_unambiguous_entries_are_skipped() {
        assert!(default_rule("^bank<n>/banco<n>/orilla<n>$", "^bank<n>/banco<n>$", OPEN).is_none());
        assert!(default_rule("^of<pr>/de<pr>$", "^of<pr>/de<pr>$", OPEN).is_none());
        assert!(default_rule("", "", OPEN).is_none());
    }

    #[test]
    fn defaults_are_unique_and_sorted() {
        let ambig = "^on<pr>/sobre<pr>/en<pr>$\n^At<pr>/en<pr>/a<pr>$\n^on<pr>/sobre<pr>/en<pr>$\n^big<adj>/grande<adj>/gran<adj>$\n";
        let unambig = "^on<pr>/sobre<pr>$\n^At<pr>/en<pr>$\n^on<pr>/sobre<pr>$\n^big<adj>/grande<adj>$\n";
        let rules = global_defaults(ambig.as_bytes(), unambig.as_bytes(), OPEN).unwrap();
        let lemmas: Vec<&str> = rules.iter().map(|r| r.source_lemma.as_str()).collect();
        assert_eq!(lemmas, vec!["At", "on"]);

        let mut out = Vec::new();
        write_global_defaults(&rules, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("<rules>\n  <rule><match lemma=\"At\""));
        assert!(text.ends_with("</rules>\n"));
        assert_eq!(text.lines().count(), 4);
    }
}
