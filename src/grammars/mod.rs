//! Grammar compilation: raw rule trees to the compiled rule model.

pub(crate) mod injections;
pub(crate) mod pattern_set;
pub mod raw;
pub(crate) mod rule;

use std::collections::HashMap;
use std::rc::Rc;

use crate::grammars::injections::{InjectionRule, parse_injection_selector};
use crate::grammars::pattern_set::PatternSet;
use crate::grammars::raw::{RawGrammar, RawRule};
use crate::grammars::rule::{
    BeginEndRule, BeginWhileRule, CaptureRule, IncludeOnlyRule, MatchRule, NEVER_MATCH,
    RegExpSource, RegExpSourceList, Rule, RuleId,
};
use crate::tokenizer::stack::StateStack;
use crate::tokenizer::{self, TokenizeLineResult};

/// Collaborator that resolves cross-grammar references.
/// Implemented by [crate::Registry]; lookups must be idempotent.
pub trait GrammarSource {
    /// Raw grammar for a scope name, used for `source.lang` includes
    fn lookup(&self, scope_name: &str) -> Option<RawGrammar>;

    /// All known grammars that declare an `injectionSelector`
    fn injector_grammars(&self) -> Vec<RawGrammar> {
        Vec::new()
    }
}

type Repository = HashMap<String, Rc<RawRule>>;

/// The five include reference forms
enum IncludeReference<'s> {
    Base,
    SelfReference,
    Relative(&'s str),
    TopLevel(&'s str),
    TopLevelRepository { scope: &'s str, name: &'s str },
}

fn parse_include(include: &str) -> IncludeReference<'_> {
    match include {
        "$base" => IncludeReference::Base,
        "$self" => IncludeReference::SelfReference,
        _ => {
            if let Some(name) = include.strip_prefix('#') {
                IncludeReference::Relative(name)
            } else {
                match include.split_once('#') {
                    Some((scope, name)) => IncludeReference::TopLevelRepository { scope, name },
                    None => IncludeReference::TopLevel(include),
                }
            }
        }
    }
}

/// Copies the grammar repository and synthesizes the `$self`/`$base`
/// entries wrapping the grammar's top-level patterns.
fn init_grammar_repository(grammar: &RawGrammar, base: Option<Rc<RawRule>>) -> Repository {
    let mut repository = grammar.repository.clone();
    let self_rule = Rc::new(RawRule {
        patterns: Some(grammar.patterns.clone()),
        name: Some(grammar.scope_name.clone()),
        ..Default::default()
    });
    repository.insert("$self".to_string(), Rc::clone(&self_rule));
    repository.insert("$base".to_string(), base.unwrap_or(self_rule));
    repository
}

struct CompiledPatterns {
    patterns: Vec<RuleId>,
    has_missing: bool,
}

/// A compiled TextMate grammar. Owns the flat rule table and every
/// compilation cache; compilation is lazy and memoized per instance.
///
/// Not thread-safe: intended for single-threaded use, one instance per
/// tokenization session (or behind external synchronization).
pub struct Grammar<'a> {
    root_scope_name: String,
    raw: RawGrammar,
    source: Option<&'a dyn GrammarSource>,
    /// Flat rule table indexed by RuleId; slot 0 unused
    rules: Vec<Option<Rule>>,
    root_id: Option<RuleId>,
    /// `$base` for repositories of external grammars pulled in by includes
    base_rule: Option<Rc<RawRule>>,
    included_grammars: HashMap<String, Option<RawGrammar>>,
    included_repositories: HashMap<String, Repository>,
    injections: Option<Rc<Vec<InjectionRule>>>,
    rule_scanners: HashMap<RuleId, RegExpSourceList>,
    while_scanners: HashMap<RuleId, RegExpSourceList>,
}

impl<'a> Grammar<'a> {
    pub fn new(raw: RawGrammar) -> Grammar<'static> {
        Grammar {
            root_scope_name: raw.scope_name.clone(),
            raw,
            source: None,
            rules: vec![None],
            root_id: None,
            base_rule: None,
            included_grammars: HashMap::new(),
            included_repositories: HashMap::new(),
            injections: None,
            rule_scanners: HashMap::new(),
            while_scanners: HashMap::new(),
        }
    }

    pub fn with_source(raw: RawGrammar, source: &'a dyn GrammarSource) -> Grammar<'a> {
        Grammar {
            root_scope_name: raw.scope_name.clone(),
            raw,
            source: Some(source),
            rules: vec![None],
            root_id: None,
            base_rule: None,
            included_grammars: HashMap::new(),
            included_repositories: HashMap::new(),
            injections: None,
            rule_scanners: HashMap::new(),
            while_scanners: HashMap::new(),
        }
    }

    pub fn scope_name(&self) -> &str {
        &self.root_scope_name
    }

    /// Tokenizes one line. `prev_state` is the continuation returned for
    /// the previous line; `None` (or the initial state) starts fresh.
    pub fn tokenize_line(&mut self, line: &str, prev_state: Option<&StateStack>) -> TokenizeLineResult {
        tokenizer::tokenize_line(self, line, prev_state)
    }

    pub(crate) fn root_rule_id(&mut self) -> RuleId {
        self.ensure_compiled()
    }

    pub(crate) fn rule(&self, rule_id: RuleId) -> &Rule {
        self.rules[rule_id.index()]
            .as_ref()
            .expect("rule id does not refer to a compiled rule")
    }

    fn try_rule(&self, rule_id: RuleId) -> Option<&Rule> {
        self.rules.get(rule_id.index())?.as_ref()
    }

    fn ensure_compiled(&mut self) -> RuleId {
        if let Some(root_id) = self.root_id {
            return root_id;
        }
        let repository = init_grammar_repository(&self.raw, None);
        let self_rule = Rc::clone(&repository["$self"]);
        self.base_rule = Some(Rc::clone(&repository["$base"]));
        let root_id = self.compile_rule(&self_rule, &repository);
        self.included_repositories
            .insert(self.root_scope_name.clone(), repository);
        self.root_id = Some(root_id);
        log::debug!(
            "compiled grammar {} ({} rules)",
            self.root_scope_name,
            self.rules.len() - 1
        );
        root_id
    }

    fn register_rule(&mut self) -> RuleId {
        let id = RuleId(self.rules.len() as i32);
        self.rules.push(None);
        id
    }

    /// Compiles one raw rule, memoized through the id cell on the raw node
    /// so that recursive includes terminate.
    fn compile_rule(&mut self, desc: &Rc<RawRule>, repository: &Repository) -> RuleId {
        if let Some(id) = desc.id.get() {
            return RuleId(id);
        }
        let id = self.register_rule();
        desc.id.set(Some(id.0));

        let rule = if let Some(match_source) = desc.match_.as_deref() {
            Rule::Match(MatchRule {
                name: desc.name.clone(),
                match_: RegExpSource::new(match_source, id),
                captures: self.compile_captures(desc.captures.as_ref(), repository),
            })
        } else if desc.begin.is_none() {
            let merged;
            let repository = if let Some(local) = &desc.repository {
                merged = {
                    let mut m = repository.clone();
                    m.extend(local.iter().map(|(k, v)| (k.clone(), Rc::clone(v))));
                    m
                };
                &merged
            } else {
                repository
            };
            let include_wrapper;
            let patterns = if desc.patterns.is_none() && desc.include.is_some() {
                include_wrapper = vec![Rc::new(RawRule {
                    include: desc.include.clone(),
                    ..Default::default()
                })];
                Some(include_wrapper.as_slice())
            } else {
                desc.patterns.as_deref()
            };
            let compiled = self.compile_patterns(patterns, repository);
            Rule::IncludeOnly(IncludeOnlyRule {
                name: desc.name.clone(),
                content_name: desc.content_name.clone(),
                patterns: compiled.patterns,
                has_missing_patterns: compiled.has_missing,
            })
        } else if desc.while_.is_some() {
            let compiled = self.compile_patterns(desc.patterns.as_deref(), repository);
            Rule::BeginWhile(BeginWhileRule {
                name: desc.name.clone(),
                content_name: desc.content_name.clone(),
                begin: RegExpSource::new(desc.begin.as_deref().unwrap_or(NEVER_MATCH), id),
                begin_captures: self.compile_captures(
                    desc.begin_captures.as_ref().or(desc.captures.as_ref()),
                    repository,
                ),
                while_: RegExpSource::new(
                    desc.while_.as_deref().unwrap_or(NEVER_MATCH),
                    RuleId::WHILE_RULE,
                ),
                while_captures: self.compile_captures(
                    desc.while_captures.as_ref().or(desc.captures.as_ref()),
                    repository,
                ),
                patterns: compiled.patterns,
                has_missing_patterns: compiled.has_missing,
            })
        } else {
            let compiled = self.compile_patterns(desc.patterns.as_deref(), repository);
            Rule::BeginEnd(BeginEndRule {
                name: desc.name.clone(),
                content_name: desc.content_name.clone(),
                begin: RegExpSource::new(desc.begin.as_deref().unwrap_or(NEVER_MATCH), id),
                begin_captures: self.compile_captures(
                    desc.begin_captures.as_ref().or(desc.captures.as_ref()),
                    repository,
                ),
                end: RegExpSource::new(desc.end.as_deref().unwrap_or(NEVER_MATCH), RuleId::END_RULE),
                end_captures: self.compile_captures(
                    desc.end_captures.as_ref().or(desc.captures.as_ref()),
                    repository,
                ),
                apply_end_pattern_last: desc.apply_end_pattern_last.unwrap_or(false),
                patterns: compiled.patterns,
                has_missing_patterns: compiled.has_missing,
            })
        };

        self.rules[id.index()] = Some(rule);
        id
    }

    fn compile_patterns(
        &mut self,
        patterns: Option<&[Rc<RawRule>]>,
        repository: &Repository,
    ) -> CompiledPatterns {
        let Some(patterns) = patterns else {
            return CompiledPatterns {
                patterns: Vec::new(),
                has_missing: false,
            };
        };

        let mut out = Vec::new();
        for pattern in patterns {
            let mut rule_id = None;

            if let Some(include) = pattern.include.as_deref() {
                match parse_include(include) {
                    // Both resolve through the repository under their
                    // literal name
                    IncludeReference::Base | IncludeReference::SelfReference => {
                        match repository.get(include) {
                            Some(rule) => {
                                rule_id = Some(self.compile_rule(&Rc::clone(rule), repository));
                            }
                            None => log::warn!("cannot find {include} in repository"),
                        }
                    }
                    IncludeReference::Relative(name) => match repository.get(name) {
                        Some(rule) => {
                            rule_id = Some(self.compile_rule(&Rc::clone(rule), repository));
                        }
                        None => log::warn!("cannot find #{name} in repository"),
                    },
                    IncludeReference::TopLevel(scope) => {
                        if let Some(external) = self.external_repository(scope) {
                            let self_rule = Rc::clone(&external["$self"]);
                            rule_id = Some(self.compile_rule(&self_rule, &external));
                        } else {
                            log::warn!("cannot find grammar for scope {scope}");
                        }
                    }
                    IncludeReference::TopLevelRepository { scope, name } => {
                        if let Some(external) = self.external_repository(scope) {
                            match external.get(name) {
                                Some(rule) => {
                                    rule_id =
                                        Some(self.compile_rule(&Rc::clone(rule), &external));
                                }
                                None => log::warn!("cannot find #{name} in grammar {scope}"),
                            }
                        } else {
                            log::warn!("cannot find grammar for scope {scope}");
                        }
                    }
                }
            } else {
                rule_id = Some(self.compile_rule(pattern, repository));
            }

            if let Some(rule_id) = rule_id {
                // A rule that only contained unresolvable includes would
                // compile to an always-failing empty alternation; elide it
                let skip = match self.try_rule(rule_id) {
                    Some(Rule::IncludeOnly(r)) => r.has_missing_patterns && r.patterns.is_empty(),
                    Some(Rule::BeginEnd(r)) => r.has_missing_patterns && r.patterns.is_empty(),
                    Some(Rule::BeginWhile(r)) => r.has_missing_patterns && r.patterns.is_empty(),
                    // Still compiling (self-recursive include) or a plain rule
                    _ => false,
                };
                if !skip {
                    out.push(rule_id);
                }
            }
        }

        let has_missing = out.len() != patterns.len();
        CompiledPatterns {
            patterns: out,
            has_missing,
        }
    }

    fn compile_captures(
        &mut self,
        captures: Option<&HashMap<String, Rc<RawRule>>>,
        repository: &Repository,
    ) -> Vec<Option<RuleId>> {
        let Some(captures) = captures else {
            return Vec::new();
        };

        let mut numeric: Vec<(usize, Rc<RawRule>)> = captures
            .iter()
            .filter_map(|(key, rule)| key.parse::<usize>().ok().map(|n| (n, Rc::clone(rule))))
            .collect();
        numeric.sort_by_key(|(n, _)| *n);

        let len = numeric.last().map_or(0, |(n, _)| *n + 1);
        let mut out = vec![None; len];
        for (index, desc) in numeric {
            // A capture with nested patterns re-tokenizes its text
            let retokenize_with = if desc.patterns.is_some() {
                self.compile_rule(&desc, repository)
            } else {
                RuleId::NO_RULE
            };
            let id = self.register_rule();
            self.rules[id.index()] = Some(Rule::Capture(CaptureRule {
                name: desc.name.clone(),
                content_name: desc.content_name.clone(),
                retokenize_with,
            }));
            out[index] = Some(id);
        }
        out
    }

    /// Repository of an external grammar (with `$self`/`$base` synthesized),
    /// deep-cloning the raw grammar on first use. Failed lookups are cached.
    fn external_repository(&mut self, scope_name: &str) -> Option<Repository> {
        if let Some(repository) = self.included_repositories.get(scope_name) {
            return Some(repository.clone());
        }

        let raw = match self.included_grammars.get(scope_name) {
            Some(cached) => cached.clone()?,
            None => {
                let looked_up = self
                    .source
                    .and_then(|source| source.lookup(scope_name))
                    .map(|grammar| grammar.deep_clone());
                self.included_grammars
                    .insert(scope_name.to_string(), looked_up.clone());
                looked_up?
            }
        };

        let repository = init_grammar_repository(&raw, self.base_rule.clone());
        self.included_repositories
            .insert(scope_name.to_string(), repository.clone());
        Some(repository)
    }

    /// All injections applicable to this grammar, sorted by priority.
    /// Built once and cached.
    pub(crate) fn injections(&mut self) -> Rc<Vec<InjectionRule>> {
        if self.injections.is_none() {
            self.ensure_compiled();
            let list = self.build_injections();
            self.injections = Some(Rc::new(list));
        }
        Rc::clone(self.injections.as_ref().unwrap())
    }

    fn build_injections(&mut self) -> Vec<InjectionRule> {
        let mut injections = Vec::new();

        if let Some(inline) = self.raw.injections.clone() {
            let repository = self.included_repositories[&self.root_scope_name].clone();
            let mut entries: Vec<_> = inline.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            for (selector, rule) in entries {
                let matchers = parse_injection_selector(&selector);
                if matchers.is_empty() {
                    continue;
                }
                let rule_id = self.compile_rule(&rule, &repository);
                for (matcher, priority) in matchers {
                    injections.push(InjectionRule {
                        matcher,
                        priority,
                        rule_id,
                    });
                }
            }
        }

        if let Some(source) = self.source {
            for injector in source.injector_grammars() {
                // A grammar never injects into itself
                if injector.scope_name == self.root_scope_name {
                    continue;
                }
                let Some(selector) = injector.injection_selector.as_deref() else {
                    continue;
                };
                let matchers = parse_injection_selector(selector);
                if matchers.is_empty() {
                    continue;
                }
                let cloned = injector.deep_clone();
                let repository = init_grammar_repository(&cloned, self.base_rule.clone());
                let wrapper = Rc::new(RawRule {
                    patterns: Some(cloned.patterns.clone()),
                    ..Default::default()
                });
                let rule_id = self.compile_rule(&wrapper, &repository);
                for (matcher, priority) in matchers {
                    injections.push(InjectionRule {
                        matcher,
                        priority,
                        rule_id,
                    });
                }
            }
        }

        injections.sort_by_key(|injection| injection.priority);
        injections
    }

    /// Pushes the patterns a rule contributes to its enclosing scanner.
    /// Plain containers flatten recursively; the visited set stops
    /// directly self-including containers.
    fn collect_patterns(
        &self,
        rule_id: RuleId,
        list: &mut RegExpSourceList,
        visited: &mut Vec<RuleId>,
    ) {
        match self.rule(rule_id) {
            Rule::Match(r) => list.push(r.match_.clone()),
            Rule::BeginEnd(r) => list.push(r.begin.clone()),
            Rule::BeginWhile(r) => list.push(r.begin.clone()),
            Rule::IncludeOnly(r) => {
                if visited.contains(&rule_id) {
                    return;
                }
                visited.push(rule_id);
                for &child in &r.patterns {
                    self.collect_patterns(child, list, visited);
                }
            }
            Rule::Capture(_) => unreachable!("capture rules do not contribute patterns"),
        }
    }

    fn build_rule_scanner(&self, rule_id: RuleId) -> RegExpSourceList {
        let mut list = RegExpSourceList::default();
        let mut visited = vec![rule_id];
        match self.rule(rule_id) {
            Rule::Match(r) => list.push(r.match_.clone()),
            Rule::IncludeOnly(r) => {
                for &child in &r.patterns {
                    self.collect_patterns(child, &mut list, &mut visited);
                }
            }
            Rule::BeginWhile(r) => {
                for &child in &r.patterns {
                    self.collect_patterns(child, &mut list, &mut visited);
                }
            }
            Rule::BeginEnd(r) => {
                for &child in &r.patterns {
                    self.collect_patterns(child, &mut list, &mut visited);
                }
                if r.apply_end_pattern_last {
                    list.push(r.end.clone());
                } else {
                    list.unshift(r.end.clone());
                }
            }
            Rule::Capture(_) => unreachable!("capture rules cannot be scanned"),
        }
        list
    }

    /// Scanner for the rule on top of the stack: its children plus, for
    /// begin/end rules, the (possibly back-reference-resolved) end pattern.
    pub(crate) fn rule_scanner(
        &mut self,
        rule_id: RuleId,
        end_rule: Option<&str>,
        allow_a: bool,
        allow_g: bool,
    ) -> Rc<PatternSet> {
        if !self.rule_scanners.contains_key(&rule_id) {
            let list = self.build_rule_scanner(rule_id);
            self.rule_scanners.insert(rule_id, list);
        }

        if let Rule::BeginEnd(r) = self.rule(rule_id)
            && r.end.has_backrefs
        {
            let resolved = end_rule.unwrap_or(&r.end.source).to_string();
            let apply_last = r.apply_end_pattern_last;
            let list = self.rule_scanners.get_mut(&rule_id).unwrap();
            let index = if apply_last { list.len() - 1 } else { 0 };
            list.set_source(index, &resolved);
        }

        self.rule_scanners
            .get_mut(&rule_id)
            .unwrap()
            .compile_ag(allow_a, allow_g)
    }

    /// Scanner holding only the while pattern of a begin/while rule
    pub(crate) fn while_scanner(
        &mut self,
        rule_id: RuleId,
        end_rule: Option<&str>,
        allow_a: bool,
        allow_g: bool,
    ) -> Rc<PatternSet> {
        if !self.while_scanners.contains_key(&rule_id) {
            let mut list = RegExpSourceList::default();
            match self.rule(rule_id) {
                Rule::BeginWhile(r) => list.push(r.while_.clone()),
                _ => panic!("while scanner requested for a rule without a while pattern"),
            }
            self.while_scanners.insert(rule_id, list);
        }

        if let Rule::BeginWhile(r) = self.rule(rule_id)
            && r.while_.has_backrefs
        {
            let resolved = end_rule.unwrap_or(NEVER_MATCH).to_string();
            self.while_scanners
                .get_mut(&rule_id)
                .unwrap()
                .set_source(0, &resolved);
        }

        self.while_scanners
            .get_mut(&rule_id)
            .unwrap()
            .compile_ag(allow_a, allow_g)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grammar(json: &str) -> Grammar<'static> {
        Grammar::new(RawGrammar::from_str(json).unwrap())
    }

    #[test]
    fn parses_all_include_forms() {
        assert!(matches!(parse_include("$base"), IncludeReference::Base));
        assert!(matches!(
            parse_include("$self"),
            IncludeReference::SelfReference
        ));
        assert!(matches!(
            parse_include("#comments"),
            IncludeReference::Relative("comments")
        ));
        assert!(matches!(
            parse_include("source.js"),
            IncludeReference::TopLevel("source.js")
        ));
        assert!(matches!(
            parse_include("source.js#statements"),
            IncludeReference::TopLevelRepository {
                scope: "source.js",
                name: "statements"
            }
        ));
    }

    #[test]
    fn compiles_a_match_rule_grammar() {
        let mut g = grammar(
            r##"{
                "scopeName": "source.test",
                "patterns": [{ "match": "a", "name": "letter.a" }]
            }"##,
        );
        let root = g.root_rule_id();
        match g.rule(root) {
            Rule::IncludeOnly(r) => {
                assert_eq!(r.patterns.len(), 1);
                assert!(matches!(g.rule(r.patterns[0]), Rule::Match(_)));
            }
            _ => panic!("root must be a container"),
        }
    }

    #[test]
    fn compilation_is_memoized() {
        let mut g = grammar(
            r##"{
                "scopeName": "source.test",
                "patterns": [{ "match": "a" }]
            }"##,
        );
        let first = g.root_rule_id();
        let rules_len = g.rules.len();
        assert_eq!(g.root_rule_id(), first);
        assert_eq!(g.rules.len(), rules_len);
    }

    #[test]
    fn self_include_reuses_the_root_rule() {
        let mut g = grammar(
            r##"{
                "scopeName": "source.test",
                "patterns": [
                    { "begin": "\\(", "end": "\\)", "patterns": [{ "include": "$self" }] },
                    { "match": "a" }
                ]
            }"##,
        );
        let root = g.root_rule_id();
        let Rule::IncludeOnly(container) = g.rule(root) else {
            panic!("root must be a container");
        };
        let Rule::BeginEnd(parens) = g.rule(container.patterns[0]) else {
            panic!("first child must be begin/end");
        };
        assert_eq!(parens.patterns, vec![root]);
    }

    #[test]
    fn missing_includes_are_elided() {
        let mut g = grammar(
            r##"{
                "scopeName": "source.test",
                "patterns": [
                    { "include": "#nope" },
                    { "patterns": [{ "include": "#also-missing" }] },
                    { "match": "a" }
                ]
            }"##,
        );
        let root = g.root_rule_id();
        let Rule::IncludeOnly(container) = g.rule(root) else {
            panic!("root must be a container");
        };
        // Unresolvable include dropped, empty-and-missing container elided
        assert_eq!(container.patterns.len(), 1);
        assert!(container.has_missing_patterns);
        assert!(matches!(g.rule(container.patterns[0]), Rule::Match(_)));
    }

    #[test]
    fn rule_local_repository_shadows_the_outer_one() {
        let mut g = grammar(
            r##"{
                "scopeName": "source.test",
                "patterns": [{ "include": "#item" }],
                "repository": {
                    "item": {
                        "repository": {
                            "inner": { "match": "b", "name": "inner.local" }
                        },
                        "patterns": [{ "include": "#inner" }]
                    },
                    "inner": { "match": "a", "name": "inner.outer" }
                }
            }"##,
        );
        let root = g.root_rule_id();
        let Rule::IncludeOnly(container) = g.rule(root) else {
            panic!();
        };
        let Rule::IncludeOnly(item) = g.rule(container.patterns[0]) else {
            panic!();
        };
        let Rule::Match(inner) = g.rule(item.patterns[0]) else {
            panic!();
        };
        assert_eq!(inner.name.as_deref(), Some("inner.local"));
    }

    #[test]
    fn captures_compile_to_a_dense_array() {
        let mut g = grammar(
            r##"{
                "scopeName": "source.test",
                "patterns": [{
                    "match": "(a)(b)?(c)",
                    "captures": {
                        "1": { "name": "first" },
                        "3": { "name": "third" }
                    }
                }]
            }"##,
        );
        let root = g.root_rule_id();
        let Rule::IncludeOnly(container) = g.rule(root) else {
            panic!();
        };
        let Rule::Match(m) = g.rule(container.patterns[0]) else {
            panic!();
        };
        assert_eq!(m.captures.len(), 4);
        assert!(m.captures[0].is_none());
        assert!(m.captures[1].is_some());
        assert!(m.captures[2].is_none());
        assert!(m.captures[3].is_some());
    }

    #[test]
    fn begin_while_falls_back_to_shared_captures() {
        let mut g = grammar(
            r##"{
                "scopeName": "source.test",
                "patterns": [{
                    "begin": "(>)",
                    "while": "(>)",
                    "captures": { "1": { "name": "quote.marker" } }
                }]
            }"##,
        );
        let root = g.root_rule_id();
        let Rule::IncludeOnly(container) = g.rule(root) else {
            panic!();
        };
        let Rule::BeginWhile(r) = g.rule(container.patterns[0]) else {
            panic!();
        };
        assert_eq!(r.begin_captures.len(), 2);
        assert_eq!(r.while_captures.len(), 2);
    }

    #[test]
    fn mutually_including_grammars_compile_finitely() {
        struct TwoGrammars;
        impl GrammarSource for TwoGrammars {
            fn lookup(&self, scope_name: &str) -> Option<RawGrammar> {
                let json = match scope_name {
                    "source.a" => {
                        r##"{
                            "scopeName": "source.a",
                            "patterns": [
                                { "match": "a", "name": "letter.a" },
                                { "begin": "<", "end": ">", "patterns": [{ "include": "source.b" }] }
                            ]
                        }"##
                    }
                    "source.b" => {
                        r##"{
                            "scopeName": "source.b",
                            "patterns": [
                                { "match": "b", "name": "letter.b" },
                                { "begin": "\\[", "end": "\\]", "patterns": [{ "include": "source.a" }] }
                            ]
                        }"##
                    }
                    _ => return None,
                };
                Some(RawGrammar::from_str(json).unwrap())
            }
        }

        let source = TwoGrammars;
        let raw = source.lookup("source.a").unwrap();
        let mut g = Grammar::with_source(raw, &source);
        let root = g.root_rule_id();
        assert!(matches!(g.rule(root), Rule::IncludeOnly(_)));
        // Compiling terminated; scanners for the root must build too
        let scanner = g.rule_scanner(root, None, true, true);
        assert!(scanner.find_at("a", 0).is_some());
    }

    #[test]
    fn external_lookup_failures_leave_other_rules_working() {
        struct NoGrammars;
        impl GrammarSource for NoGrammars {
            fn lookup(&self, _scope_name: &str) -> Option<RawGrammar> {
                None
            }
        }

        let source = NoGrammars;
        let raw = RawGrammar::from_str(
            r##"{
                "scopeName": "source.test",
                "patterns": [
                    { "include": "text.missing" },
                    { "match": "a", "name": "letter.a" }
                ]
            }"##,
        )
        .unwrap();
        let mut g = Grammar::with_source(raw, &source);
        let root = g.root_rule_id();
        let Rule::IncludeOnly(container) = g.rule(root) else {
            panic!();
        };
        assert_eq!(container.patterns.len(), 1);
        assert!(container.has_missing_patterns);
    }
}
