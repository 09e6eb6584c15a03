//! Compiled rule model: the five rule kinds and their regex sources.

use std::rc::Rc;

use crate::grammars::pattern_set::PatternSet;

/// Identity of a compiled rule inside one grammar's rule table.
///
/// Negative values are sentinels reported by the scanner: `END_RULE` means
/// the end pattern of the begin/end rule on top of the stack matched,
/// `WHILE_RULE` the while pattern of a begin/while rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct RuleId(pub(crate) i32);

impl RuleId {
    pub(crate) const NO_RULE: RuleId = RuleId(0);
    pub(crate) const END_RULE: RuleId = RuleId(-1);
    pub(crate) const WHILE_RULE: RuleId = RuleId(-2);

    pub(crate) fn index(self) -> usize {
        debug_assert!(self.0 > 0);
        self.0 as usize
    }
}

/// Never-matching pattern, substituted for dead anchors, absent end
/// patterns and regexes that fail to compile.
pub(crate) const NEVER_MATCH: &str = "\u{FFFF}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaseTransform {
    None,
    Downcase,
    Upcase,
}

/// Parses a capture placeholder (`$1`, `${1:/downcase}`, `${1:/upcase}`)
/// at the start of `s` (which must begin with `$`). Returns the matched
/// length, the capture index and the case transform.
fn parse_capture_placeholder(s: &str) -> Option<(usize, usize, CaseTransform)> {
    let rest = &s[1..];
    if rest.starts_with('{') {
        let digits: String = rest[1..].chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return None;
        }
        let after = &rest[1 + digits.len()..];
        let index: usize = digits.parse().ok()?;
        for (suffix, transform) in [
            (":/downcase}", CaseTransform::Downcase),
            (":/upcase}", CaseTransform::Upcase),
        ] {
            if after.starts_with(suffix) {
                return Some((1 + 1 + digits.len() + suffix.len(), index, transform));
            }
        }
        None
    } else {
        let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
        if digits.is_empty() {
            return None;
        }
        let index: usize = digits.parse().ok()?;
        Some((1 + digits.len(), index, CaseTransform::None))
    }
}

/// Whether a scope name template contains capture placeholders
pub(crate) fn has_captures(source: Option<&str>) -> bool {
    let Some(source) = source else {
        return false;
    };
    let mut rest = source;
    while let Some(pos) = rest.find('$') {
        if parse_capture_placeholder(&rest[pos..]).is_some() {
            return true;
        }
        rest = &rest[pos + 1..];
    }
    false
}

/// Substitutes capture placeholders in a scope name template with the
/// corresponding captured text. Leading dots are stripped from the captured
/// text so the result stays a valid scope name segment.
pub(crate) fn replace_captures(
    template: &str,
    capture_source: &str,
    capture_indices: &[Option<(usize, usize)>],
) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        match parse_capture_placeholder(&rest[pos..]) {
            Some((len, index, transform)) => {
                match capture_indices.get(index).copied().flatten() {
                    Some((start, end)) => {
                        let captured = capture_source[start..end].trim_start_matches('.');
                        match transform {
                            CaseTransform::None => out.push_str(captured),
                            CaseTransform::Downcase => out.push_str(&captured.to_lowercase()),
                            CaseTransform::Upcase => out.push_str(&captured.to_uppercase()),
                        }
                    }
                    None => out.push_str(&rest[pos..pos + len]),
                }
                rest = &rest[pos + len..];
            }
            None => {
                out.push('$');
                rest = &rest[pos + 1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Escapes regex metacharacters so captured text can be substituted into a
/// back-referencing end pattern literally.
pub(crate) fn escape_regex(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c.is_whitespace() || "-\\{}*+?|^$.,[]()#".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// One regex source string tagged with the rule it belongs to.
///
/// `\z` is rewritten at construction. `\A`/`\G` anchors are only
/// conditionally live, so a source containing them precomputes the four
/// allowA/allowG variants with dead anchors replaced by a character that
/// never occurs in text.
#[derive(Debug, Clone)]
pub(crate) struct RegExpSource {
    pub source: String,
    pub rule_id: RuleId,
    pub has_anchor: bool,
    pub has_backrefs: bool,
    anchor_variants: Option<[String; 4]>,
}

impl RegExpSource {
    pub(crate) fn new(source: &str, rule_id: RuleId) -> Self {
        let mut rewritten = String::with_capacity(source.len());
        let mut has_anchor = false;
        let mut chars = source.chars();
        while let Some(c) = chars.next() {
            if c == '\\' {
                match chars.next() {
                    Some('z') => rewritten.push_str("$(?!\\n)(?<!\\n)"),
                    Some(next) => {
                        if next == 'A' || next == 'G' {
                            has_anchor = true;
                        }
                        rewritten.push('\\');
                        rewritten.push(next);
                    }
                    None => rewritten.push('\\'),
                }
            } else {
                rewritten.push(c);
            }
        }

        let has_backrefs = contains_backreference(&rewritten);
        let anchor_variants = if has_anchor {
            Some([
                substitute_anchors(&rewritten, false, false),
                substitute_anchors(&rewritten, false, true),
                substitute_anchors(&rewritten, true, false),
                substitute_anchors(&rewritten, true, true),
            ])
        } else {
            None
        };

        RegExpSource {
            source: rewritten,
            rule_id,
            has_anchor,
            has_backrefs,
            anchor_variants,
        }
    }

    pub(crate) fn resolve_anchors(&self, allow_a: bool, allow_g: bool) -> &str {
        match &self.anchor_variants {
            Some(variants) => &variants[(allow_a as usize) * 2 + allow_g as usize],
            None => &self.source,
        }
    }

    /// Substitutes `\N` back-references with the escaped text the begin
    /// match captured for group N.
    pub(crate) fn resolve_backreferences(
        &self,
        line: &str,
        capture_indices: &[Option<(usize, usize)>],
    ) -> String {
        let mut out = String::with_capacity(self.source.len());
        let mut chars = self.source.char_indices().peekable();
        while let Some((_, c)) = chars.next() {
            if c == '\\'
                && let Some(&(digit_start, digit)) = chars.peek()
                && digit.is_ascii_digit()
            {
                let mut digit_end = digit_start;
                while let Some(&(pos, d)) = chars.peek() {
                    if d.is_ascii_digit() {
                        digit_end = pos + d.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let index: usize = match self.source[digit_start..digit_end].parse() {
                    Ok(index) => index,
                    Err(_) => continue,
                };
                if let Some((start, end)) = capture_indices.get(index).copied().flatten() {
                    out.push_str(&escape_regex(&line[start..end]));
                }
            } else {
                out.push(c);
            }
        }
        out
    }
}

fn contains_backreference(source: &str) -> bool {
    let bytes = source.as_bytes();
    bytes
        .windows(2)
        .any(|w| w[0] == b'\\' && w[1].is_ascii_digit())
}

/// Replaces dead `\A`/`\G` anchors with an escaped never-matching
/// character, leaving live anchors intact.
fn substitute_anchors(source: &str, allow_a: bool, allow_g: bool) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('A') => {
                    out.push('\\');
                    out.push(if allow_a { 'A' } else { '\u{FFFF}' });
                }
                Some('G') => {
                    out.push('\\');
                    out.push(if allow_g { 'G' } else { '\u{FFFF}' });
                }
                Some(next) => {
                    out.push('\\');
                    out.push(next);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// An ordered list of regex sources compiled together into one scanner.
///
/// Keeps the plain compiled form plus the four anchor variants, rebuilt
/// when a back-reference-bearing source is swapped in.
#[derive(Debug, Default)]
pub(crate) struct RegExpSourceList {
    items: Vec<RegExpSource>,
    has_anchors: bool,
    cached: Option<Rc<PatternSet>>,
    anchor_cache: [Option<Rc<PatternSet>>; 4],
}

impl RegExpSourceList {
    pub(crate) fn push(&mut self, item: RegExpSource) {
        self.has_anchors |= item.has_anchor;
        self.items.push(item);
    }

    pub(crate) fn unshift(&mut self, item: RegExpSource) {
        self.has_anchors |= item.has_anchor;
        self.items.insert(0, item);
        self.dispose_caches();
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    /// Swaps the source at `index`, invalidating compiled scanners when it
    /// actually changed. Used for end patterns resolved against begin
    /// captures.
    pub(crate) fn set_source(&mut self, index: usize, source: &str) {
        if self.items[index].source != source {
            let rule_id = self.items[index].rule_id;
            self.items[index] = RegExpSource::new(source, rule_id);
            self.dispose_caches();
        }
    }

    pub(crate) fn compile(&mut self) -> Rc<PatternSet> {
        if self.cached.is_none() {
            let items = self
                .items
                .iter()
                .map(|item| (item.rule_id, item.source.clone()))
                .collect();
            self.cached = Some(Rc::new(PatternSet::new(items)));
        }
        Rc::clone(self.cached.as_ref().unwrap())
    }

    pub(crate) fn compile_ag(&mut self, allow_a: bool, allow_g: bool) -> Rc<PatternSet> {
        if !self.has_anchors {
            return self.compile();
        }
        let slot = (allow_a as usize) * 2 + allow_g as usize;
        if self.anchor_cache[slot].is_none() {
            let items = self
                .items
                .iter()
                .map(|item| (item.rule_id, item.resolve_anchors(allow_a, allow_g).to_string()))
                .collect();
            self.anchor_cache[slot] = Some(Rc::new(PatternSet::new(items)));
        }
        Rc::clone(self.anchor_cache[slot].as_ref().unwrap())
    }

    fn dispose_caches(&mut self) {
        self.cached = None;
        self.anchor_cache = [None, None, None, None];
    }
}

/// A compiled grammar rule. Exactly five kinds exist.
#[derive(Debug)]
pub(crate) enum Rule {
    Match(MatchRule),
    IncludeOnly(IncludeOnlyRule),
    BeginEnd(BeginEndRule),
    BeginWhile(BeginWhileRule),
    Capture(CaptureRule),
}

#[derive(Debug)]
pub(crate) struct MatchRule {
    pub name: Option<String>,
    pub match_: RegExpSource,
    pub captures: Vec<Option<RuleId>>,
}

#[derive(Debug)]
pub(crate) struct IncludeOnlyRule {
    pub name: Option<String>,
    pub content_name: Option<String>,
    pub patterns: Vec<RuleId>,
    pub has_missing_patterns: bool,
}

#[derive(Debug)]
pub(crate) struct BeginEndRule {
    pub name: Option<String>,
    pub content_name: Option<String>,
    pub begin: RegExpSource,
    pub begin_captures: Vec<Option<RuleId>>,
    pub end: RegExpSource,
    pub end_captures: Vec<Option<RuleId>>,
    pub apply_end_pattern_last: bool,
    pub patterns: Vec<RuleId>,
    pub has_missing_patterns: bool,
}

#[derive(Debug)]
pub(crate) struct BeginWhileRule {
    pub name: Option<String>,
    pub content_name: Option<String>,
    pub begin: RegExpSource,
    pub begin_captures: Vec<Option<RuleId>>,
    pub while_: RegExpSource,
    pub while_captures: Vec<Option<RuleId>>,
    pub patterns: Vec<RuleId>,
    pub has_missing_patterns: bool,
}

/// Only reachable through capture arrays, never matched directly.
#[derive(Debug)]
pub(crate) struct CaptureRule {
    pub name: Option<String>,
    pub content_name: Option<String>,
    /// When the capture declared nested patterns, the captured text is
    /// re-tokenized with this rule.
    pub retokenize_with: RuleId,
}

impl Rule {
    fn name_template(&self) -> Option<&str> {
        match self {
            Rule::Match(r) => r.name.as_deref(),
            Rule::IncludeOnly(r) => r.name.as_deref(),
            Rule::BeginEnd(r) => r.name.as_deref(),
            Rule::BeginWhile(r) => r.name.as_deref(),
            Rule::Capture(r) => r.name.as_deref(),
        }
    }

    fn content_name_template(&self) -> Option<&str> {
        match self {
            Rule::Match(_) => None,
            Rule::IncludeOnly(r) => r.content_name.as_deref(),
            Rule::BeginEnd(r) => r.content_name.as_deref(),
            Rule::BeginWhile(r) => r.content_name.as_deref(),
            Rule::Capture(r) => r.content_name.as_deref(),
        }
    }

    pub(crate) fn name(
        &self,
        line: &str,
        capture_indices: &[Option<(usize, usize)>],
    ) -> Option<String> {
        let template = self.name_template()?;
        if has_captures(Some(template)) {
            Some(replace_captures(template, line, capture_indices))
        } else {
            Some(template.to_string())
        }
    }

    pub(crate) fn content_name(
        &self,
        line: &str,
        capture_indices: &[Option<(usize, usize)>],
    ) -> Option<String> {
        let template = self.content_name_template()?;
        if has_captures(Some(template)) {
            Some(replace_captures(template, line, capture_indices))
        } else {
            Some(template.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_capture_placeholders() {
        assert!(has_captures(Some("meta.$1.block")));
        assert!(has_captures(Some("${2:/downcase}")));
        assert!(has_captures(Some("${2:/upcase}")));
        assert!(!has_captures(Some("meta.block")));
        assert!(!has_captures(None));
        // `$` followed by a non-digit is not a placeholder
        assert!(!has_captures(Some("end$")));
        assert!(!has_captures(Some("${oops}")));
    }

    #[test]
    fn replaces_simple_captures() {
        let captures = vec![Some((0, 8)), Some((4, 7))];
        assert_eq!(
            replace_captures("meta.$1.block", "val Foo = 1", &captures),
            "meta.Foo.block"
        );
    }

    #[test]
    fn strips_leading_dots_and_applies_case() {
        let captures = vec![Some((0, 4))];
        assert_eq!(replace_captures("${0:/downcase}", ".FOO", &captures), "foo");
        assert_eq!(replace_captures("${0:/upcase}", ".foo", &captures), "FOO");
    }

    #[test]
    fn keeps_unmatched_placeholders() {
        let captures = vec![Some((0, 3))];
        assert_eq!(replace_captures("a.$7.b", "xyz", &captures), "a.$7.b");
    }

    #[test]
    fn rewrites_end_of_string_marker() {
        let source = RegExpSource::new("foo\\z", RuleId(1));
        assert_eq!(source.source, "foo$(?!\\n)(?<!\\n)");
        assert!(!source.has_anchor);
    }

    #[test]
    fn anchor_variants_kill_dead_anchors() {
        let source = RegExpSource::new("\\A(a)\\G", RuleId(1));
        assert!(source.has_anchor);
        assert_eq!(source.resolve_anchors(true, true), "\\A(a)\\G");
        assert_eq!(source.resolve_anchors(true, false), "\\A(a)\\\u{FFFF}");
        assert_eq!(source.resolve_anchors(false, true), "\\\u{FFFF}(a)\\G");
        assert_eq!(
            source.resolve_anchors(false, false),
            "\\\u{FFFF}(a)\\\u{FFFF}"
        );
    }

    #[test]
    fn detects_backreferences() {
        assert!(RegExpSource::new("</\\1>", RuleId(1)).has_backrefs);
        assert!(!RegExpSource::new("</(div)>", RuleId(1)).has_backrefs);
    }

    #[test]
    fn resolves_backreferences_with_escaping() {
        let source = RegExpSource::new("</\\1>", RuleId(1));
        let line = "<a.b>";
        let captures = vec![Some((0, 5)), Some((1, 4))];
        assert_eq!(source.resolve_backreferences(line, &captures), "</a\\.b>");
    }

    #[test]
    fn missing_backreference_resolves_to_empty() {
        let source = RegExpSource::new("</\\2>", RuleId(1));
        let captures = vec![Some((0, 5)), Some((1, 4))];
        assert_eq!(source.resolve_backreferences("<a.b>", &captures), "</>");
    }
}
