//! Injection selector parsing and matching.

use std::sync::LazyLock;

use crate::grammars::rule::RuleId;

/// Priority of an injection relative to the grammar's own rules, from the
/// selector prefix: `L:` wins ties against normal matches, `R:` yields.
/// Sort order is the application order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) enum InjectionPriority {
    High,
    Default,
    Low,
}

/// A compiled injection: where it may match and what to match there
#[derive(Debug)]
pub(crate) struct InjectionRule {
    pub matcher: SelectorMatcher,
    pub priority: InjectionPriority,
    pub rule_id: RuleId,
}

/// A selector expression evaluated against a scope stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SelectorMatcher {
    /// Multi-segment name matcher: every pattern must match some scope,
    /// in order, scanning the stack outward to inward without overlap
    Names(Vec<String>),
    /// All matchers must succeed (space-separated)
    And(Vec<SelectorMatcher>),
    /// Any matcher can succeed (`|` or `,` separated, inside parens)
    Or(Vec<SelectorMatcher>),
    /// Matcher must NOT succeed (`-` prefix)
    Not(Box<SelectorMatcher>),
}

/// Scope `S` matches pattern `P` iff `S == P` or `S` starts with `P`
/// followed by a dot.
pub(crate) fn matches_scope(pattern: &str, scope: &str) -> bool {
    scope == pattern
        || (scope.starts_with(pattern) && scope.as_bytes().get(pattern.len()) == Some(&b'.'))
}

impl SelectorMatcher {
    pub(crate) fn matches(&self, scopes: &[String]) -> bool {
        match self {
            SelectorMatcher::Names(patterns) => {
                let mut next = 0;
                patterns.iter().all(|pattern| {
                    for (i, scope) in scopes.iter().enumerate().skip(next) {
                        if matches_scope(pattern, scope) {
                            next = i + 1;
                            return true;
                        }
                    }
                    false
                })
            }
            SelectorMatcher::And(matchers) => matchers.iter().all(|m| m.matches(scopes)),
            SelectorMatcher::Or(matchers) => matchers.iter().any(|m| m.matches(scopes)),
            SelectorMatcher::Not(matcher) => !matcher.matches(scopes),
        }
    }
}

static TOKEN_REGEX: LazyLock<onig::Regex> = LazyLock::new(|| {
    onig::Regex::new(r"([LR]:|[\w.:][\w.:\-]*|[,|\-()])").expect("invalid selector token regex")
});

fn is_identifier(token: &str) -> bool {
    !matches!(token, "" | "-" | "," | "|" | "(" | ")" | "L:" | "R:")
}

fn parse_operand(tokens: &[&str], position: &mut usize) -> Option<SelectorMatcher> {
    if *position >= tokens.len() {
        return None;
    }

    match tokens[*position] {
        "-" => {
            *position += 1;
            let negated = parse_operand(tokens, position)?;
            Some(SelectorMatcher::Not(Box::new(negated)))
        }
        "(" => {
            *position += 1;
            let inner = parse_inner_expression(tokens, position);
            if *position < tokens.len() && tokens[*position] == ")" {
                *position += 1;
            }
            inner
        }
        _ => {
            let mut names = Vec::new();
            while *position < tokens.len() && is_identifier(tokens[*position]) {
                names.push(tokens[*position].to_string());
                *position += 1;
            }
            if names.is_empty() {
                None
            } else {
                Some(SelectorMatcher::Names(names))
            }
        }
    }
}

fn parse_conjunction(tokens: &[&str], position: &mut usize) -> Option<SelectorMatcher> {
    let mut matchers = Vec::new();
    while let Some(m) = parse_operand(tokens, position) {
        matchers.push(m);
    }

    match matchers.len() {
        0 => None,
        1 => matchers.pop(),
        _ => Some(SelectorMatcher::And(matchers)),
    }
}

fn parse_inner_expression(tokens: &[&str], position: &mut usize) -> Option<SelectorMatcher> {
    let mut matchers = Vec::new();
    while let Some(m) = parse_conjunction(tokens, position) {
        matchers.push(m);
        if *position < tokens.len() && matches!(tokens[*position], "|" | ",") {
            *position += 1;
        } else {
            break;
        }
    }

    match matchers.len() {
        0 => None,
        1 => matchers.pop(),
        _ => Some(SelectorMatcher::Or(matchers)),
    }
}

/// Parses an injection selector into matchers with priorities.
/// Malformed selectors degrade to fewer (possibly zero) matchers.
pub(crate) fn parse_injection_selector(
    selector: &str,
) -> Vec<(SelectorMatcher, InjectionPriority)> {
    let tokens: Vec<&str> = TOKEN_REGEX
        .find_iter(selector)
        .map(|(start, end)| &selector[start..end])
        .collect();

    let mut position = 0;
    let mut result = Vec::new();
    while position < tokens.len() {
        let priority = match tokens[position] {
            "L:" => {
                position += 1;
                InjectionPriority::High
            }
            "R:" => {
                position += 1;
                InjectionPriority::Low
            }
            _ => InjectionPriority::Default,
        };

        match parse_conjunction(&tokens, &mut position) {
            Some(matcher) => result.push((matcher, priority)),
            None => break,
        }
        if position < tokens.len() && tokens[position] == "," {
            position += 1;
        } else {
            break;
        }
    }

    result
}
