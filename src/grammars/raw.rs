use std::cell::Cell;
use std::collections::HashMap;
use std::io::Read;
use std::rc::Rc;

use serde::{Deserialize, Deserializer};

use crate::error::AmbraResult;

/// A single raw grammar rule as found in TextMate JSON grammars.
///
/// All fields are optional; which ones are present determines the rule kind
/// during compilation (`match` -> match rule, `begin`+`end` -> begin/end,
/// `begin`+`while` -> begin/while, otherwise a plain container).
///
/// # Examples
/// ```json
/// {
///   "name": "string.quoted.double.js",
///   "begin": "\"",
///   "end": "\"",
///   "patterns": [
///     { "match": "\\\\.", "name": "constant.character.escape.js" }
///   ]
/// }
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all(deserialize = "camelCase"), default)]
pub struct RawRule {
    /// Compiled rule id, assigned on first compilation of this node.
    /// Memoized so that mutually recursive includes terminate.
    #[serde(skip)]
    pub(crate) id: Cell<Option<i32>>,

    /// Reference to other patterns: `#name`, `source.lang`,
    /// `source.lang#name`, `$self` or `$base`
    pub include: Option<String>,
    /// Scope name for the whole match or region.
    /// May contain capture references like `$1` or `${1:/downcase}`
    pub name: Option<String>,
    /// Scope name for the text between begin and end
    pub content_name: Option<String>,

    /// Regex for a single-line match rule
    #[serde(rename(deserialize = "match"))]
    pub match_: Option<String>,
    /// Capture groups for `match` (also the fallback for begin/while rules)
    pub captures: Option<HashMap<String, Rc<RawRule>>>,

    /// Regex opening a multi-line region
    pub begin: Option<String>,
    /// Capture groups for `begin`
    pub begin_captures: Option<HashMap<String, Rc<RawRule>>>,
    /// Regex closing a begin/end region; may reference begin captures (`\1`)
    pub end: Option<String>,
    /// Capture groups for `end`
    pub end_captures: Option<HashMap<String, Rc<RawRule>>>,
    /// Regex that must keep matching at the start of every continuation line
    /// for a begin/while region to stay open
    #[serde(rename(deserialize = "while"))]
    pub while_: Option<String>,
    /// Capture groups for `while`
    pub while_captures: Option<HashMap<String, Rc<RawRule>>>,

    /// Child patterns
    pub patterns: Option<Vec<Rc<RawRule>>>,
    /// Rule-local named patterns, shadowing the grammar repository
    pub repository: Option<HashMap<String, Rc<RawRule>>>,

    /// When set, the end pattern is tried after the nested patterns
    /// instead of before them. Some grammars write it as a 0/1 integer.
    #[serde(deserialize_with = "bool_or_int", rename = "applyEndPatternLast")]
    pub apply_end_pattern_last: Option<bool>,
}

impl Clone for RawRule {
    fn clone(&self) -> Self {
        RawRule {
            id: self.id.clone(),
            include: self.include.clone(),
            name: self.name.clone(),
            content_name: self.content_name.clone(),
            match_: self.match_.clone(),
            captures: self.captures.clone(),
            begin: self.begin.clone(),
            begin_captures: self.begin_captures.clone(),
            end: self.end.clone(),
            end_captures: self.end_captures.clone(),
            while_: self.while_.clone(),
            while_captures: self.while_captures.clone(),
            patterns: self.patterns.clone(),
            repository: self.repository.clone(),
            apply_end_pattern_last: self.apply_end_pattern_last,
        }
    }
}

impl RawRule {
    /// Clones the whole rule tree into fresh nodes with unassigned ids.
    ///
    /// Rule ids are per-grammar, so a raw rule embedded into a second
    /// grammar (external include or injector) must not share id cells with
    /// the first one.
    pub(crate) fn deep_clone(&self) -> RawRule {
        RawRule {
            id: Cell::new(None),
            include: self.include.clone(),
            name: self.name.clone(),
            content_name: self.content_name.clone(),
            match_: self.match_.clone(),
            captures: self.captures.as_ref().map(deep_clone_map),
            begin: self.begin.clone(),
            begin_captures: self.begin_captures.as_ref().map(deep_clone_map),
            end: self.end.clone(),
            end_captures: self.end_captures.as_ref().map(deep_clone_map),
            while_: self.while_.clone(),
            while_captures: self.while_captures.as_ref().map(deep_clone_map),
            patterns: self
                .patterns
                .as_ref()
                .map(|rules| rules.iter().map(|r| Rc::new(r.deep_clone())).collect()),
            repository: self.repository.as_ref().map(deep_clone_map),
            apply_end_pattern_last: self.apply_end_pattern_last,
        }
    }
}

fn deep_clone_map(map: &HashMap<String, Rc<RawRule>>) -> HashMap<String, Rc<RawRule>> {
    map.iter()
        .map(|(k, v)| (k.clone(), Rc::new(v.deep_clone())))
        .collect()
}

/// Accepts `true`/`false` as well as the 0/1 integers some grammars use.
fn bool_or_int<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolOrInt {
        Bool(bool),
        Int(i64),
    }

    Ok(Option::<BoolOrInt>::deserialize(deserializer)?.map(|v| match v {
        BoolOrInt::Bool(b) => b,
        BoolOrInt::Int(i) => i == 1,
    }))
}

/// Top-level structure of a TextMate grammar file
///
/// # Examples
/// ```json
/// {
///   "name": "JavaScript",
///   "scopeName": "source.js",
///   "fileTypes": ["js", "jsx", "mjs"],
///   "patterns": [{ "include": "#statements" }],
///   "repository": {
///     "statements": { "patterns": [{ "include": "#keywords" }] }
///   }
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all(deserialize = "camelCase"), default)]
pub struct RawGrammar {
    /// Human-readable name of the language, e.g. "JavaScript"
    pub name: Option<String>,
    /// Unique identifier for this grammar, e.g. "source.js"
    pub scope_name: String,
    /// Root patterns applied at the top level when tokenizing
    pub patterns: Vec<Rc<RawRule>>,
    /// Named pattern definitions referenced by `#name` includes
    pub repository: HashMap<String, Rc<RawRule>>,
    /// Inline injections: selector string -> rule injected where it matches
    pub injections: Option<HashMap<String, Rc<RawRule>>>,
    /// Selector defining where this whole grammar injects itself
    /// into other grammars
    pub injection_selector: Option<String>,
    /// File extensions this grammar applies to
    pub file_types: Vec<String>,
    /// Regex to identify files by their first line content
    pub first_line_match: Option<String>,
}

impl RawGrammar {
    pub fn from_reader<R: Read>(reader: R) -> AmbraResult<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn from_str(content: &str) -> AmbraResult<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// See [RawRule::deep_clone]
    pub(crate) fn deep_clone(&self) -> RawGrammar {
        RawGrammar {
            name: self.name.clone(),
            scope_name: self.scope_name.clone(),
            patterns: self.patterns.iter().map(|r| Rc::new(r.deep_clone())).collect(),
            repository: deep_clone_map(&self.repository),
            injections: self.injections.as_ref().map(deep_clone_map),
            injection_selector: self.injection_selector.clone(),
            file_types: self.file_types.clone(),
            first_line_match: self.first_line_match.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_parse_a_basic_grammar() {
        let grammar = RawGrammar::from_str(
            r##"{
                "name": "JSON",
                "scopeName": "source.json",
                "patterns": [
                    { "include": "#value" }
                ],
                "repository": {
                    "value": {
                        "patterns": [
                            { "match": "true|false", "name": "constant.language.json" }
                        ]
                    }
                }
            }"##,
        )
        .unwrap();

        assert_eq!(grammar.scope_name, "source.json");
        assert_eq!(grammar.patterns.len(), 1);
        assert_eq!(grammar.patterns[0].include.as_deref(), Some("#value"));
        let value = &grammar.repository["value"];
        assert_eq!(value.patterns.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn apply_end_pattern_last_accepts_bool_and_int() {
        let as_int: RawRule =
            serde_json::from_str(r#"{"begin": "a", "end": "b", "applyEndPatternLast": 1}"#).unwrap();
        assert_eq!(as_int.apply_end_pattern_last, Some(true));

        let as_bool: RawRule =
            serde_json::from_str(r#"{"begin": "a", "end": "b", "applyEndPatternLast": true}"#)
                .unwrap();
        assert_eq!(as_bool.apply_end_pattern_last, Some(true));

        let absent: RawRule = serde_json::from_str(r#"{"begin": "a", "end": "b"}"#).unwrap();
        assert_eq!(absent.apply_end_pattern_last, None);
    }

    #[test]
    fn deep_clone_resets_compiled_ids() {
        let rule: RawRule =
            serde_json::from_str(r#"{"patterns": [{"match": "a"}]}"#).unwrap();
        rule.id.set(Some(7));
        rule.patterns.as_ref().unwrap()[0].id.set(Some(8));

        let cloned = rule.deep_clone();
        assert_eq!(cloned.id.get(), None);
        assert_eq!(cloned.patterns.as_ref().unwrap()[0].id.get(), None);
    }
}
