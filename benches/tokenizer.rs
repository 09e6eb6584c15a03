use ambra::{Grammar, RawGrammar, StateStack};
use criterion::{Criterion, criterion_group, criterion_main};

const JSON_GRAMMAR: &str = r##"{
    "scopeName": "source.json",
    "patterns": [{ "include": "#value" }],
    "repository": {
        "value": {
            "patterns": [
                { "include": "#object" },
                { "include": "#array" },
                { "include": "#string" },
                { "include": "#number" },
                { "include": "#constant" }
            ]
        },
        "object": {
            "begin": "\\{",
            "end": "\\}",
            "name": "meta.structure.dictionary.json",
            "patterns": [
                { "include": "#string" },
                { "match": ":", "name": "punctuation.separator.key-value.json" },
                { "include": "#value" }
            ]
        },
        "array": {
            "begin": "\\[",
            "end": "\\]",
            "name": "meta.structure.array.json",
            "patterns": [{ "include": "#value" }]
        },
        "string": {
            "begin": "\"",
            "end": "\"",
            "name": "string.quoted.double.json",
            "patterns": [
                { "match": "\\\\.", "name": "constant.character.escape.json" }
            ]
        },
        "number": {
            "match": "-?\\d+(\\.\\d+)?",
            "name": "constant.numeric.json"
        },
        "constant": {
            "match": "\\b(?:true|false|null)\\b",
            "name": "constant.language.json"
        }
    }
}"##;

fn criterion_benchmark(c: &mut Criterion) {
    let json_input = r##"{"name": "John", "age": 30, "active": true, "score": 95.5, "tags": ["developer", "rust"], "address": null}"##;

    c.bench_function("json single line", |b| {
        let mut grammar = Grammar::new(RawGrammar::from_str(JSON_GRAMMAR).unwrap());
        b.iter(|| {
            let result = grammar.tokenize_line(json_input, None);
            std::hint::black_box(result);
        })
    });

    c.bench_function("json multi line with continuation", |b| {
        let mut grammar = Grammar::new(RawGrammar::from_str(JSON_GRAMMAR).unwrap());
        let lines = ["{", "  \"a\": [1, 2, 3],", "  \"b\": \"text\"", "}"];
        b.iter(|| {
            let mut state = StateStack::initial();
            for line in lines {
                let result = grammar.tokenize_line(line, Some(&state));
                state = result.rule_stack;
                std::hint::black_box(result.tokens);
            }
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
