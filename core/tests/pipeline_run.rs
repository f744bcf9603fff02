// End-to-end runs of the learning pipeline over a small corpus.
//
// The external trainer is replaced by `UniformTrainer`, which emits one
// weight per (feature, class) of its input so that every stage after
// training sees realistic input without spawning yasmet.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use lexsel_core::{Config, CorpusInputs, FeatureTable, FrequencyLexicon, Pipeline, Trainer};

struct UniformTrainer;

impl Trainer for UniformTrainer {
    fn train(&self, input: &Path, output: &Path) -> lexsel_core::Result<()> {
        let text = fs::read_to_string(input)?;
        let mut lines = text.lines();
        let classes: u32 = lines.next().unwrap().trim().parse().unwrap();
        let mut features = BTreeSet::new();
        for line in lines {
            // first class block: `outcome # f:0 f:0 # ...`
            let block = line.split('#').nth(1).unwrap();
            for pair in block.split_whitespace() {
                let (f, _) = pair.split_once(':').unwrap();
                features.insert(f.parse::<u32>().unwrap());
            }
        }
        let mut out = String::new();
        for f in &features {
            for c in 0..classes {
                out.push_str(&format!("{f}:{c} 0.{}\n", c + 1));
            }
        }
        fs::write(output, out)?;
        Ok(())
    }
}

const SOURCE: &str = "\
^the<det>$ ^bank<n>$ ^closes<vblex>$
^the<det>$ ^bank<n>$ ^closes<vblex>$
^the<det>$ ^river<n>$ ^bank<n>$
^the<det>$ ^house<n>$
^the<det>$ ^bank<n>$
";

const BILTRANS: &str = "\
^the<det>/el<det>$ ^bank<n>/banco<n>/ribera<n>$ ^close<vblex>/cerrar<vblex>$
^the<det>/el<det>$ ^bank<n>/banco<n>/ribera<n>$ ^close<vblex>/cerrar<vblex>$
^the<det>/el<det>$ ^river<n>/río<n>/arroyo<n>$ ^bank<n>/banco<n>/ribera<n>$
^the<det>/el<det>$ ^house<n>/casa<n>$
^the<det>/el<det>$ ^bank<n>/banco<n>/ribera<n>$
";

const TARGET: &str = "\
^el<det>$ ^banco<n>$ ^cierra<vblex>$
^el<det>$ ^banco<n>$ ^cierra<vblex>$
^la<det>$ ^ribera<n>$ ^del<pr>$ ^río<n>$
^la<det>$ ^casa<n>$
^el<det>$ ^banco<n>$
";

const ALIGNMENT: &str = "\
0-0 1-1 2-2
0-0 1-1 2-2
0-0 1-2 3-1
0-0 1-1
0-0 1-x
";

fn write_corpus(dir: &Path) -> CorpusInputs {
    let inputs = CorpusInputs {
        source: dir.join("corpus.en"),
        biltrans: dir.join("corpus.biltrans"),
        target: dir.join("corpus.es"),
        alignment: dir.join("corpus.align"),
    };
    fs::write(&inputs.source, SOURCE).unwrap();
    fs::write(&inputs.biltrans, BILTRANS).unwrap();
    fs::write(&inputs.target, TARGET).unwrap();
    fs::write(&inputs.alignment, ALIGNMENT).unwrap();
    inputs
}

fn pipeline(dir: &Path) -> Pipeline {
    let config = Config {
        corpus_name: "tiny".into(),
        data_dir: dir.join("data"),
        ..Config::default()
    };
    Pipeline::new(config).unwrap()
}

#[test]
fn full_run_produces_rule_document() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = write_corpus(dir.path());
    let pipeline = pipeline(dir.path());

    let summary = pipeline.run(&inputs, &UniformTrainer).unwrap();

    assert_eq!(summary.extract.total, 5);
    assert_eq!(summary.extract.valid, 3);
    assert_eq!(summary.extract.errors, 2);
    assert_eq!(summary.lexicon_words, 2);
    assert_eq!(summary.events.events, 3);
    assert_eq!(summary.events.single_class, 1);
    assert_eq!(summary.rules.weight_lines, summary.weights);
    assert_eq!(
        summary.rules.emitted + summary.rules.rejected,
        summary.rules.weight_lines
    );
    assert!(summary.rules.emitted > 0);
    // the one-word `bank` window after the sentence end is below minmatch
    assert!(summary.rules.rejected > 0);

    let paths = pipeline.paths();
    let lexicon = FrequencyLexicon::load(&paths.lexicon).unwrap();
    assert_eq!(lexicon.default_for("^bank<n>$"), Some("^banco<n>$"));
    assert_eq!(lexicon.class_id("^bank<n>$", "^ribera<n>$"), Some(1));

    let features = FeatureTable::load(&paths.features).unwrap();
    assert_eq!(features.len(), summary.features);
    assert!(features.id_of("^the<det>$ ^bank<n>$ ^closes<vblex>$").is_some());

    let doc = fs::read_to_string(&paths.rules).unwrap();
    assert!(doc.starts_with("<rules>\n"));
    assert!(doc.ends_with("</rules>\n"));
    assert_eq!(doc.matches("<rule ").count(), summary.rules.emitted);
    assert!(doc.contains("<select lemma=\"banco\" tags=\"n\"/>"));
    assert!(doc.contains("<select lemma=\"ribera\" tags=\"n\"/>"));

    // intermediate rows and no scratch files left behind
    let rows = fs::read_to_string(&paths.rule_rows).unwrap();
    assert_eq!(rows.lines().count(), summary.weights);
    let ngram_rows = fs::read_to_string(&paths.ngram_rows).unwrap();
    assert!(ngram_rows.lines().all(|l| l.starts_with("+ ") && l.ends_with("\t1")));
    let leftovers = fs::read_dir(&paths.learn_dir)
        .unwrap()
        .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().starts_with("tmp."))
        .count();
    assert_eq!(leftovers, 0);
}

#[test]
fn single_translation_word_never_reaches_rules() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = write_corpus(dir.path());
    let pipeline = pipeline(dir.path());
    pipeline.run(&inputs, &UniformTrainer).unwrap();

    let paths = pipeline.paths();
    let events = fs::read_to_string(&paths.events).unwrap();
    assert!(events.lines().all(|l| l.starts_with("^bank<n>$\t2\t")));
    let weights = fs::read_to_string(&paths.weights).unwrap();
    assert!(!weights.lines().any(|l| l.starts_with("^river<n>$")));
    let doc = fs::read_to_string(&paths.rules).unwrap();
    assert!(!doc.contains("lemma=\"río\""));
}

#[test]
fn runs_are_byte_identical() {
    let run = || {
        let dir = tempfile::tempdir().unwrap();
        let inputs = write_corpus(dir.path());
        let pipeline = pipeline(dir.path());
        pipeline.run(&inputs, &UniformTrainer).unwrap();
        let paths = pipeline.paths();
        (
            fs::read(&paths.lexicon).unwrap(),
            fs::read(&paths.features).unwrap(),
            fs::read(&paths.events).unwrap(),
            fs::read(&paths.rules).unwrap(),
        )
    };
    assert_eq!(run(), run());
}

#[test]
fn stages_can_be_rerun_from_files() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = write_corpus(dir.path());
    let pipeline = pipeline(dir.path());
    pipeline.run(&inputs, &UniformTrainer).unwrap();
    let first = fs::read(&pipeline.paths().rules).unwrap();

    let stats = pipeline.emit_rules().unwrap();
    assert!(stats.emitted > 0);
    assert_eq!(fs::read(&pipeline.paths().rules).unwrap(), first);
}

#[test]
fn missing_input_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut inputs = write_corpus(dir.path());
    inputs.alignment = dir.path().join("missing.align");
    let err = pipeline(dir.path()).extract_candidates(&inputs).unwrap_err();
    assert!(format!("{err:#}").contains("missing.align"));
}

#[test]
fn global_defaults_document() {
    let dir = tempfile::tempdir().unwrap();
    let ambig = dir.path().join("ambig");
    let unambig = dir.path().join("unambig");
    fs::write(&ambig, "^in<pr>/en<pr>/dentro de<pr>$\n^bank<n>/banco<n>/ribera<n>$\n").unwrap();
    fs::write(&unambig, "^in<pr>/en<pr>$\n^bank<n>/banco<n>$\n").unwrap();

    let pipeline = pipeline(dir.path());
    assert_eq!(pipeline.global_defaults(&ambig, &unambig).unwrap(), 1);
    let doc = fs::read_to_string(&pipeline.paths().global_defaults).unwrap();
    assert!(doc.contains("<match lemma=\"in\" tags=\"pr\"><select lemma=\"en\" tags=\"pr\"/></match>"));
    assert!(pipeline
        .paths()
        .global_defaults
        .ends_with("global-defaults.en-es.lrx"));
}

#[test]
fn default_trainer_follows_config() {
    let dir = tempfile::tempdir().unwrap();
    let trainer = pipeline(dir.path()).default_trainer();
    assert_eq!(trainer.program, Path::new("yasmet"));
    assert_eq!(trainer.min_ngrams, 5);
    assert!(trainer.reduce);
}
