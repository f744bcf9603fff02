//! Tokenizer for tagged and bilingual-candidate stream lines.
//!
//! Both grammars share the same surface shape: a line is a sequence of units
//! `^...$`, each unit holding one or more `/`-separated analyses of the form
//! `lemma<tag><tag>...`. A tagger line carries one analysis per unit; a
//! biltrans line carries the source analysis followed by every candidate
//! translation the bilingual dictionary produced for it.
//!
//! The scanner is a small explicit automaton. A backslash escapes the next
//! character wherever it appears, and a leading unescaped `*` on a lemma marks
//! an unknown word. Malformed input never fails: an unterminated unit is
//! emitted as a partial token and stray characters outside units are ignored,
//! leaving sentence-level validation to the caller.

use std::fmt;

/// Characters that must be escaped when a lemma is written back out.
const SPECIAL: [char; 6] = ['\\', '^', '$', '/', '<', '>'];

/// One analysed word: a lemma and its ordered tags.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TaggedToken {
    lemma: String,
    tags: Vec<String>,
    unknown: bool,
}

impl TaggedToken {
    pub fn new<L: Into<String>>(lemma: L, tags: Vec<String>) -> Self {
        Self {
            lemma: lemma.into(),
            tags,
            unknown: false,
        }
    }

    /// A word the analyser did not recognise (`*lemma`, no tags).
    pub fn unknown<L: Into<String>>(lemma: L) -> Self {
        Self {
            lemma: lemma.into(),
            tags: Vec::new(),
            unknown: true,
        }
    }

    pub fn lemma(&self) -> &str {
        &self.lemma
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn is_unknown(&self) -> bool {
        self.unknown
    }

    /// The grammatical category, i.e. the first tag.
    pub fn first_tag(&self) -> Option<&str> {
        self.tags.first().map(String::as_str)
    }

    /// Tags joined with dots (`n.sg`), the form used by rule documents.
    pub fn dotted_tags(&self) -> String {
        self.tags.join(".")
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Text between `^` and `$`, re-escaped: `lemma<tag><tag>`.
    pub fn surface(&self) -> String {
        let mut out = String::with_capacity(self.lemma.len() + 8 * self.tags.len());
        if self.unknown {
            out.push('*');
        }
        for c in self.lemma.chars() {
            if SPECIAL.contains(&c) {
                out.push('\\');
            }
            out.push(c);
        }
        for tag in &self.tags {
            out.push('<');
            out.push_str(tag);
            out.push('>');
        }
        out
    }

    /// The full unit, `^lemma<tag>$`.
    pub fn unit(&self) -> String {
        format!("^{}$", self.surface())
    }
}

impl fmt::Display for TaggedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.surface())
    }
}

/// A source word together with all its dictionary translations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BiltransToken {
    pub source: TaggedToken,
    pub candidates: Vec<TaggedToken>,
}

impl BiltransToken {
    /// More than one candidate translation.
    pub fn is_ambiguous(&self) -> bool {
        self.candidates.len() > 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    PreMarker,
    SourceLemma,
    SourceTags,
    TargetLemma,
    TargetTags,
}

#[derive(Default)]
struct AnalysisBuf {
    lemma: String,
    tags: Vec<String>,
    tag: String,
    in_tag: bool,
    unknown: bool,
}

impl AnalysisBuf {
    fn is_empty(&self) -> bool {
        self.lemma.is_empty() && self.tags.is_empty() && self.tag.is_empty() && !self.unknown
    }

    fn push(&mut self, c: char) {
        if self.in_tag {
            self.tag.push(c);
        } else {
            self.lemma.push(c);
        }
    }

    fn close_tag(&mut self) {
        if !self.tag.is_empty() {
            self.tags.push(std::mem::take(&mut self.tag));
        }
        self.in_tag = false;
    }

    fn finish(&mut self) -> TaggedToken {
        self.close_tag();
        let buf = std::mem::take(self);
        TaggedToken {
            lemma: buf.lemma,
            tags: buf.tags,
            unknown: buf.unknown,
        }
    }
}

/// Splits a line into units, each a list of analyses.
struct Scanner {
    state: State,
    escaped: bool,
    current: AnalysisBuf,
    analyses: Vec<TaggedToken>,
    units: Vec<Vec<TaggedToken>>,
}

impl Scanner {
    fn new() -> Self {
        Self {
            state: State::PreMarker,
            escaped: false,
            current: AnalysisBuf::default(),
            analyses: Vec::new(),
            units: Vec::new(),
        }
    }

    fn run(mut self, line: &str) -> Vec<Vec<TaggedToken>> {
        for c in line.chars() {
            self.feed(c);
        }
        if self.state != State::PreMarker {
            self.end_unit();
        }
        self.units
    }

    fn feed(&mut self, c: char) {
        if self.escaped {
            self.escaped = false;
            if self.state != State::PreMarker {
                self.current.push(c);
            }
            return;
        }
        if c == '\\' {
            self.escaped = true;
            return;
        }

        match self.state {
            State::PreMarker => {
                if c == '^' {
                    self.state = State::SourceLemma;
                }
            }
            State::SourceLemma | State::TargetLemma | State::SourceTags | State::TargetTags => {
                match c {
                    '^' => {
                        // previous unit never closed
                        self.end_unit();
                        self.state = State::SourceLemma;
                    }
                    '$' => {
                        self.end_unit();
                        self.state = State::PreMarker;
                    }
                    '/' => {
                        self.end_analysis();
                        self.state = State::TargetLemma;
                    }
                    '<' => {
                        self.current.close_tag();
                        self.current.in_tag = true;
                        self.state = match self.state {
                            State::SourceLemma | State::SourceTags => State::SourceTags,
                            _ => State::TargetTags,
                        };
                    }
                    '>' if self.current.in_tag => self.current.close_tag(),
                    '*' if self.is_lemma_start() => self.current.unknown = true,
                    _ => self.current.push(c),
                }
            }
        }
    }

    fn is_lemma_start(&self) -> bool {
        matches!(self.state, State::SourceLemma | State::TargetLemma) && self.current.is_empty()
    }

    fn end_analysis(&mut self) {
        let token = self.current.finish();
        self.analyses.push(token);
    }

    fn end_unit(&mut self) {
        if !self.current.is_empty() || self.analyses.is_empty() {
            self.end_analysis();
        }
        self.units.push(std::mem::take(&mut self.analyses));
    }
}

/// Tokenize a tagger-output line; only the first analysis of each unit is kept.
pub fn tokenize_tagger_line(line: &str) -> Vec<TaggedToken> {
    Scanner::new()
        .run(line)
        .into_iter()
        .filter_map(|unit| unit.into_iter().next())
        .collect()
}

/// Tokenize a biltrans line into source analyses and their candidates.
pub fn tokenize_biltrans_line(line: &str) -> Vec<BiltransToken> {
    Scanner::new()
        .run(line)
        .into_iter()
        .filter_map(|unit| {
            let mut analyses = unit.into_iter();
            let source = analyses.next()?;
            Some(BiltransToken {
                source,
                candidates: analyses.collect(),
            })
        })
        .collect()
}

/// Parse one unit such as `^some#~word<n><sg>$` into the lemma (with `~`
/// turned back into spaces) and dot-joined tags: `("some# word", "n.sg")`.
pub fn lemma_and_tags(word: &str) -> (String, String) {
    match tokenize_tagger_line(word).into_iter().next() {
        Some(token) => {
            let mut lemma = token.lemma.replace('~', " ");
            if token.unknown {
                lemma.insert(0, '*');
            }
            (lemma, token.dotted_tags())
        }
        None => (String::new(), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn tagger_line_yields_lemma_and_tags() {
        let toks = tokenize_tagger_line("^the<det><def>$ ^bank<n><sg>$");
        assert_eq!(toks.len(), 2);
        assert_eq!(toks[0].lemma(), "the");
        assert_eq!(toks[0].tags(), tags(&["det", "def"]).as_slice());
        assert_eq!(toks[1].first_tag(), Some("n"));
        assert_eq!(toks[1].surface(), "bank<n><sg>");
    }

    #[test]
    fn biltrans_line_keeps_all_candidates() {
        let toks = tokenize_biltrans_line("^the<det>/el<det>$ ^bank<n>/banco<n>/ribera<n>$");
        assert_eq!(toks.len(), 2);
        assert!(!toks[0].is_ambiguous());
        assert!(toks[1].is_ambiguous());
        assert_eq!(toks[1].source.lemma(), "bank");
        let lemmas: Vec<&str> = toks[1].candidates.iter().map(|t| t.lemma()).collect();
        assert_eq!(lemmas, vec!["banco", "ribera"]);
    }

    #[test]
    fn escapes_are_part_of_the_lemma() {
        let toks = tokenize_tagger_line(r"^a\/b\$c<n>$ ^x\<y<adj>$");
        assert_eq!(toks.len(), 2);
        assert_eq!(toks[0].lemma(), "a/b$c");
        assert_eq!(toks[1].lemma(), "x<y");
        assert_eq!(toks[0].surface(), r"a\/b\$c<n>");
    }

    #[test]
    fn escaped_slash_does_not_split_biltrans_analyses() {
        let toks = tokenize_biltrans_line(r"^and\/or<cnjcoo>/y\/o<cnjcoo>$");
        assert_eq!(toks.len(), 1);
        assert_eq!(toks[0].candidates.len(), 1);
        assert_eq!(toks[0].candidates[0].lemma(), "y/o");
    }

    #[test]
    fn star_marks_unknown_words() {
        let toks = tokenize_tagger_line("^*Zorblax$ ^run<vblex>$");
        assert!(toks[0].is_unknown());
        assert_eq!(toks[0].lemma(), "Zorblax");
        assert!(toks[0].tags().is_empty());
        assert_eq!(toks[0].unit(), "^*Zorblax$");
        assert!(!toks[1].is_unknown());
    }

    #[test]
    fn unterminated_unit_is_partial_not_an_error() {
        let toks = tokenize_tagger_line("^the<det>$ ^bank<n");
        assert_eq!(toks.len(), 2);
        assert_eq!(toks[1].lemma(), "bank");
        assert_eq!(toks[1].tags(), tags(&["n"]).as_slice());

        let toks = tokenize_tagger_line("junk $ outside ^ok<adv>$ trailing");
        assert_eq!(toks.len(), 1);
        assert_eq!(toks[0].lemma(), "ok");
    }

    #[test]
    fn empty_line_has_no_tokens() {
        assert!(tokenize_tagger_line("").is_empty());
        assert!(tokenize_biltrans_line("   ").is_empty());
    }

    #[test]
    fn lemma_and_tags_restores_spaces() {
        let (lemma, tags) = lemma_and_tags("^some#~word<n><sg><*>$");
        assert_eq!(lemma, "some# word");
        assert_eq!(tags, "n.sg.*");

        let (lemma, tags) = lemma_and_tags("^<n>$");
        assert_eq!(lemma, "");
        assert_eq!(tags, "n");
    }
}
