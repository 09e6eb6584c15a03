//! Explicit grammar and theme registry.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use crate::error::{AmbraResult, Error};
use crate::grammars::{Grammar, GrammarSource};
use crate::grammars::raw::RawGrammar;
use crate::themes::Theme;
use crate::themes::raw::RawTheme;

/// Holds raw grammars keyed by scope name and compiled themes keyed by a
/// user-chosen name. Grammars are handed out as independent [Grammar]
/// instances that resolve cross-grammar includes and external injections
/// through the registry.
#[derive(Default)]
pub struct Registry {
    raw_grammars: HashMap<String, RawGrammar>,
    themes: HashMap<String, Theme>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a grammar, replacing any previous one with the same scope name
    pub fn add_grammar(&mut self, raw: RawGrammar) {
        self.raw_grammars.insert(raw.scope_name.clone(), raw);
    }

    /// Reads the file and adds it as a grammar.
    pub fn add_grammar_from_path(&mut self, path: impl AsRef<Path>) -> AmbraResult<()> {
        let raw = RawGrammar::from_reader(File::open(path)?)?;
        self.add_grammar(raw);
        Ok(())
    }

    /// Compiles and adds a theme under the given name
    pub fn add_theme(&mut self, name: &str, raw: &RawTheme) -> AmbraResult<()> {
        let theme = Theme::from_raw_theme(raw)?;
        self.themes.insert(name.to_string(), theme);
        Ok(())
    }

    /// Reads the file and adds it as a theme.
    pub fn add_theme_from_path(&mut self, name: &str, path: impl AsRef<Path>) -> AmbraResult<()> {
        let raw = RawTheme::from_reader(File::open(path)?)?;
        self.add_theme(name, &raw)
    }

    /// Checks whether a grammar with the given scope name is available
    pub fn contains_grammar(&self, scope_name: &str) -> bool {
        self.raw_grammars.contains_key(scope_name)
    }

    /// Checks whether the given theme is available in the registry
    pub fn contains_theme(&self, name: &str) -> bool {
        self.themes.contains_key(name)
    }

    /// A fresh tokenizer for the grammar with the given scope name.
    ///
    /// Every call returns an independent instance with its own rule table
    /// and caches; instances stay usable after more grammars are added.
    pub fn grammar(&self, scope_name: &str) -> AmbraResult<Grammar<'_>> {
        let raw = self
            .raw_grammars
            .get(scope_name)
            .ok_or_else(|| Error::GrammarNotFound(scope_name.to_string()))?;
        Ok(Grammar::with_source(raw.deep_clone(), self))
    }

    pub fn theme(&self, name: &str) -> AmbraResult<&Theme> {
        self.themes
            .get(name)
            .ok_or_else(|| Error::ThemeNotFound(name.to_string()))
    }
}

impl GrammarSource for Registry {
    fn lookup(&self, scope_name: &str) -> Option<RawGrammar> {
        // The caller deep-clones before compiling, a plain clone is enough
        self.raw_grammars.get(scope_name).cloned()
    }

    fn injector_grammars(&self) -> Vec<RawGrammar> {
        self.raw_grammars
            .values()
            .filter(|raw| raw.injection_selector.is_some())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(grammars: &[&str]) -> Registry {
        let mut registry = Registry::new();
        for json in grammars {
            registry.add_grammar(RawGrammar::from_str(json).unwrap());
        }
        registry
    }

    #[test]
    fn missing_grammar_and_theme_are_reported() {
        let registry = Registry::new();
        assert!(matches!(
            registry.grammar("source.nope"),
            Err(Error::GrammarNotFound(_))
        ));
        assert!(matches!(
            registry.theme("nope"),
            Err(Error::ThemeNotFound(_))
        ));
    }

    #[test]
    fn grammars_resolve_includes_through_the_registry() {
        let registry = registry_with(&[
            r##"{
                "scopeName": "text.host",
                "patterns": [
                    { "begin": "<js>", "end": "</js>", "name": "meta.embedded",
                      "patterns": [{ "include": "source.js" }] }
                ]
            }"##,
            r##"{
                "scopeName": "source.js",
                "patterns": [{ "match": "var", "name": "keyword.var" }]
            }"##,
        ]);

        let mut grammar = registry.grammar("text.host").unwrap();
        let result = grammar.tokenize_line("<js>var</js>", None);
        let keyword = result
            .tokens
            .iter()
            .find(|t| t.scopes.last().map(String::as_str) == Some("keyword.var"))
            .expect("embedded grammar must tokenize");
        assert_eq!(keyword.span, 4..7);
        assert_eq!(
            keyword.scopes,
            vec!["text.host", "meta.embedded", "keyword.var"]
        );
    }

    #[test]
    fn injector_grammars_apply_to_other_grammars() {
        let registry = registry_with(&[
            r##"{
                "scopeName": "source.host",
                "patterns": [{ "match": "b+", "name": "letter.b" }]
            }"##,
            r##"{
                "scopeName": "source.todo",
                "injectionSelector": "L:source.host",
                "patterns": [{ "match": "TODO", "name": "keyword.todo" }]
            }"##,
        ]);

        let mut grammar = registry.grammar("source.host").unwrap();
        let result = grammar.tokenize_line("TODO bb", None);
        assert_eq!(
            result.tokens[0].scopes,
            vec!["source.host", "keyword.todo"]
        );
        assert_eq!(result.tokens[0].span, 0..4);
    }

    #[test]
    fn each_grammar_instance_is_independent() {
        let registry = registry_with(&[r##"{
            "scopeName": "source.test",
            "patterns": [{ "match": "a", "name": "letter.a" }]
        }"##]);

        let mut first = registry.grammar("source.test").unwrap();
        let mut second = registry.grammar("source.test").unwrap();
        let a = first.tokenize_line("a", None);
        let b = second.tokenize_line("a", None);
        assert_eq!(a.tokens, b.tokens);
    }

    #[test]
    fn themes_are_stored_and_looked_up_by_name() {
        let mut registry = Registry::new();
        let raw = RawTheme::from_str(
            r##"{
                "colors": { "editor.foreground": "#ABCDEF", "editor.background": "#000000" },
                "tokenColors": []
            }"##,
        )
        .unwrap();
        registry.add_theme("test", &raw).unwrap();
        assert!(registry.contains_theme("test"));
        let theme = registry.theme("test").unwrap();
        assert_eq!(theme.default_style().foreground.as_hex(), "#ABCDEF");
    }
}
