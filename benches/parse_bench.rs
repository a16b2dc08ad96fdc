//! Benchmarks for chart expansion over linear-chain inputs.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use scfg_chart::{
    Chart, ChartConfig, FeatureFunction, Grammar, Lattice, Rule, RuleScore, Symbol, SymbolTable,
    WordPenalty,
};

struct Setup {
    symbols: SymbolTable,
    models: Vec<Box<dyn FeatureFunction>>,
    grammars: Vec<Grammar>,
    words: Vec<Symbol>,
}

/// A small binary grammar with lexical ambiguity: every word can be an X,
/// and Xs combine under two differently-weighted rules.
fn build_setup(sentence_len: usize) -> Setup {
    let mut symbols = SymbolTable::new();
    let s = symbols.nonterminal("S");
    let x = symbols.nonterminal("X");

    let models: Vec<Box<dyn FeatureFunction>> = vec![
        Box::new(RuleScore::new(vec![1.0, 0.5])),
        Box::new(WordPenalty::new(0.1)),
    ];

    let mut grammar = Grammar::new();
    let vocab: Vec<Symbol> = (0..5)
        .map(|k| symbols.terminal(&format!("w{k}")))
        .collect();
    for &w in &vocab {
        grammar.add_rule(Rule::new(x, vec![w], vec![w], vec![1.0, 0.2]));
        grammar.add_rule(Rule::new(x, vec![w], vec![w, w], vec![2.0, 0.1]));
    }
    grammar.add_rule(Rule::new(x, vec![x, x], vec![x, x], vec![0.5, 0.0]));
    grammar.add_rule(Rule::new(x, vec![x, x], vec![x, x], vec![0.8, 0.3]));
    grammar.add_rule(Rule::new(s, vec![x], vec![x], vec![0.1, 0.0]));
    grammar.sort_rules(&models);

    let words: Vec<Symbol> = (0..sentence_len).map(|k| vocab[k % vocab.len()]).collect();
    Setup {
        symbols,
        models,
        grammars: vec![grammar],
        words,
    }
}

fn run_parse(setup: &mut Setup, config: &ChartConfig) -> f64 {
    let lattice = Lattice::from_symbols(&setup.words);
    let mut chart = Chart::new(
        &lattice,
        &setup.models,
        &setup.grammars,
        &mut setup.symbols,
        config.clone(),
        "S",
        &[],
        0,
    )
    .unwrap();
    chart.expand().unwrap().best_cost()
}

fn bench_cube_prune(c: &mut Criterion) {
    let mut setup = build_setup(12);
    let config = ChartConfig::default();

    c.bench_function("parse_12_cube_prune", |b| {
        b.iter(|| run_parse(black_box(&mut setup), &config))
    });
}

fn bench_exhaustive(c: &mut Criterion) {
    let mut setup = build_setup(12);
    let config = ChartConfig {
        use_cube_prune: false,
        ..ChartConfig::default()
    };

    c.bench_function("parse_12_exhaustive", |b| {
        b.iter(|| run_parse(black_box(&mut setup), &config))
    });
}

fn bench_unpruned(c: &mut Criterion) {
    let mut setup = build_setup(8);
    let config = ChartConfig::unpruned();

    c.bench_function("parse_8_unpruned", |b| {
        b.iter(|| run_parse(black_box(&mut setup), &config))
    });
}

criterion_group!(benches, bench_cube_prune, bench_exhaustive, bench_unpruned);
criterion_main!(benches);
