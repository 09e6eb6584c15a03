//! The per-line tokenization state machine.
//!
//! Lines are scanned with a synthetic trailing `\n` appended so that
//! newline-anchored end patterns and end-of-line captures work uniformly;
//! the final token of a line may therefore end one past the visible
//! length and callers should clamp when displaying.

pub(crate) mod stack;

use std::ops::Range;
use std::rc::Rc;

use crate::grammars::Grammar;
use crate::grammars::injections::{InjectionPriority, InjectionRule};
use crate::grammars::pattern_set::PatternSetMatch;
use crate::grammars::rule::{Rule, RuleId};
use crate::tokenizer::stack::{AttributedScopeStack, Frame, StackFrame, StateStack};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Byte span within the line (start inclusive, end exclusive, 0-based)
    pub span: Range<usize>,
    /// Scope names, ordered from outermost to innermost
    /// (e.g. source.js -> string.quoted.double -> punctuation.definition)
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TokenizeLineResult {
    /// Gapless tokens tiling the line
    pub tokens: Vec<Token>,
    /// Continuation to pass back for the next line
    pub rule_stack: StateStack,
}

/// Small wrapper so we only ever produce valid, gapless tokens
#[derive(Debug, Default)]
struct LineTokens {
    tokens: Vec<Token>,
    /// Position up to which tokens have been generated
    last_end: usize,
}

impl LineTokens {
    fn produce(&mut self, stack: &Frame, end: usize) {
        self.produce_from_scopes(&stack.content_scopes, end);
    }

    fn produce_from_scopes(&mut self, scopes: &AttributedScopeStack, end: usize) {
        // Skip empty tokens (can happen with zero-width matches)
        if end <= self.last_end {
            return;
        }
        self.tokens.push(Token {
            span: self.last_end..end,
            scopes: scopes.scope_names(),
        });
        self.last_end = end;
    }

    fn into_result(mut self, stack: &Frame, line_len: usize) -> Vec<Token> {
        // Drop the token covering only the synthetic newline
        if let Some(last) = self.tokens.last()
            && last.span.start == line_len - 1
        {
            self.tokens.pop();
        }
        if self.tokens.is_empty() {
            self.last_end = 0;
            self.produce(stack, line_len);
            if let Some(first) = self.tokens.first_mut() {
                first.span.start = 0;
            }
        }
        self.tokens
    }
}

/// Per-line scratch positions for one stack depth. Call-local: the
/// persisted continuation never carries these.
#[derive(Debug, Clone, Copy, Default)]
struct FrameScratch {
    /// Line position at which the frame was pushed during this line
    enter_pos: Option<usize>,
    /// Anchor position to restore when the frame is popped
    anchor_pos: Option<usize>,
}

pub(crate) fn tokenize_line(
    grammar: &mut Grammar,
    line_text: &str,
    prev_state: Option<&StateStack>,
) -> TokenizeLineResult {
    let root_id = grammar.root_rule_id();
    let (is_first_line, frame) = match prev_state.map(|state| &state.frame) {
        Some(Some(frame)) => (false, Rc::clone(frame)),
        _ => {
            let scopes = AttributedScopeStack::root(grammar.scope_name(), 0);
            (true, StackFrame::root(root_id, scopes))
        }
    };

    let line = format!("{line_text}\n");
    let mut line_tokens = LineTokens::default();
    let mut scratch = vec![FrameScratch::default(); frame.depth];
    let result = tokenize_string(
        grammar,
        &line,
        is_first_line,
        0,
        frame,
        &mut scratch,
        &mut line_tokens,
        true,
    );

    TokenizeLineResult {
        tokens: line_tokens.into_result(&result, line.len()),
        rule_stack: StateStack {
            frame: Some(result),
        },
    }
}

/// Whether the frame chain starting at `frame` contains `rule_id` among
/// the frames entered at the same position as the new push. Detects a
/// zero-width recursive push of the same rule.
fn has_same_rule_as(
    frame: &Frame,
    scratch: &[FrameScratch],
    rule_id: RuleId,
    enter_pos: Option<usize>,
) -> bool {
    let mut current = Some(frame);
    while let Some(el) = current {
        let el_enter = scratch.get(el.depth - 1).and_then(|s| s.enter_pos);
        if el_enter != enter_pos {
            break;
        }
        if el.rule_id == rule_id {
            return true;
        }
        current = el.parent.as_ref();
    }
    false
}

#[allow(clippy::too_many_arguments)]
fn tokenize_string(
    grammar: &mut Grammar,
    line: &str,
    mut is_first_line: bool,
    mut line_pos: usize,
    mut stack: Frame,
    scratch: &mut Vec<FrameScratch>,
    line_tokens: &mut LineTokens,
    check_while_conditions: bool,
) -> Frame {
    let line_len = line.len();
    let mut anchor_position: Option<usize> = None;

    if check_while_conditions {
        let while_result = check_while(grammar, line, is_first_line, line_pos, stack, line_tokens);
        stack = while_result.stack;
        line_pos = while_result.line_pos;
        is_first_line = while_result.is_first_line;
        anchor_position = while_result.anchor_position;
        scratch.clear();
        scratch.resize(stack.depth, FrameScratch::default());
    }

    loop {
        let Some(m) = match_rule_or_injections(
            grammar,
            line,
            is_first_line,
            line_pos,
            &stack,
            anchor_position,
        ) else {
            line_tokens.produce(&stack, line_len);
            break;
        };

        if m.capture_pos.is_empty() {
            // The scanner returned a match without any capture groups,
            // not even group 0; nothing sane can be done with it
            line_tokens.produce(&stack, line_len);
            break;
        }

        let has_advanced = m.end > line_pos;

        if m.rule_id == RuleId::END_RULE {
            // Closing the rule on top of the stack
            let end_captures = match grammar.rule(stack.rule_id) {
                Rule::BeginEnd(r) => r.end_captures.clone(),
                _ => panic!("an end pattern matched but no begin/end rule is on top of the stack"),
            };

            line_tokens.produce(&stack, m.start);
            // The end delimiter itself sits outside the content scopes
            stack = stack.with_content_scopes(stack.name_scopes.clone());
            handle_captures(
                grammar,
                line,
                is_first_line,
                &stack,
                scratch,
                line_tokens,
                &end_captures,
                &m.capture_pos,
            );
            line_tokens.produce(&stack, m.end);

            let popped = Rc::clone(&stack);
            let popped_scratch = scratch.pop().unwrap_or_default();
            stack = stack.pop().expect("cannot pop the root of the state stack");
            anchor_position = popped_scratch.anchor_pos;

            if !has_advanced && popped_scratch.enter_pos == Some(line_pos) {
                // Grammar pushed and popped in place without consuming
                // anything; restore and stop to avoid looping forever
                log::warn!("grammar matched begin and end at the same position, stopping");
                stack = popped;
                scratch.push(popped_scratch);
                line_tokens.produce(&stack, line_len);
                break;
            }
        } else {
            let rule_id = m.rule_id;
            let name = grammar.rule(rule_id).name(line, &m.capture_pos);

            line_tokens.produce(&stack, m.start);
            let before_push = Rc::clone(&stack);
            let name_scopes = stack.content_scopes.push(name.as_deref());
            stack = stack.push(
                rule_id,
                m.end == line_len,
                None,
                name_scopes.clone(),
                name_scopes.clone(),
            );
            scratch.push(FrameScratch {
                enter_pos: Some(line_pos),
                anchor_pos: anchor_position,
            });

            match grammar.rule(rule_id) {
                Rule::BeginEnd(_) | Rule::BeginWhile(_) => {
                    let (begin_captures, content_name, resolved_secondary) = {
                        let rule = grammar.rule(rule_id);
                        let content_name = rule.content_name(line, &m.capture_pos);
                        match rule {
                            Rule::BeginEnd(r) => (
                                r.begin_captures.clone(),
                                content_name,
                                r.end
                                    .has_backrefs
                                    .then(|| r.end.resolve_backreferences(line, &m.capture_pos)),
                            ),
                            Rule::BeginWhile(r) => (
                                r.begin_captures.clone(),
                                content_name,
                                r.while_
                                    .has_backrefs
                                    .then(|| r.while_.resolve_backreferences(line, &m.capture_pos)),
                            ),
                            _ => unreachable!(),
                        }
                    };

                    handle_captures(
                        grammar,
                        line,
                        is_first_line,
                        &stack,
                        scratch,
                        line_tokens,
                        &begin_captures,
                        &m.capture_pos,
                    );
                    line_tokens.produce(&stack, m.end);
                    anchor_position = Some(m.end);

                    let content_scopes = name_scopes.push(content_name.as_deref());
                    stack = stack.with_content_scopes(content_scopes);
                    if let Some(resolved) = resolved_secondary {
                        stack = stack.with_end_rule(resolved);
                    }

                    if !has_advanced
                        && has_same_rule_as(&before_push, scratch, rule_id, Some(line_pos))
                    {
                        log::warn!("grammar pushed the same rule without advancing, stopping");
                        stack = stack.pop().expect("just pushed, pop cannot fail");
                        scratch.pop();
                        line_tokens.produce(&stack, line_len);
                        break;
                    }
                }
                Rule::Match(_) => {
                    let captures = match grammar.rule(rule_id) {
                        Rule::Match(r) => r.captures.clone(),
                        _ => unreachable!(),
                    };
                    handle_captures(
                        grammar,
                        line,
                        is_first_line,
                        &stack,
                        scratch,
                        line_tokens,
                        &captures,
                        &m.capture_pos,
                    );
                    line_tokens.produce(&stack, m.end);

                    // Match rules never persist on the stack
                    stack = stack.pop().expect("just pushed, pop cannot fail");
                    scratch.pop();

                    if !has_advanced {
                        log::warn!("grammar matched zero-width without advancing, stopping");
                        let popped = stack.safe_pop();
                        if !Rc::ptr_eq(&popped, &stack) {
                            scratch.pop();
                        }
                        stack = popped;
                        line_tokens.produce(&stack, line_len);
                        break;
                    }
                }
                Rule::IncludeOnly(_) | Rule::Capture(_) => {
                    // Containers cannot be matched directly; emit what we
                    // have and back out
                    log::warn!("matched an unexpected rule kind, ignoring the match");
                    line_tokens.produce(&stack, m.end);
                    stack = stack.pop().expect("just pushed, pop cannot fail");
                    scratch.pop();
                    if !has_advanced {
                        line_tokens.produce(&stack, line_len);
                        break;
                    }
                }
            }
        }

        if m.end > line_pos {
            line_pos = m.end;
            is_first_line = false;
        }
    }

    stack
}

fn match_rule(
    grammar: &mut Grammar,
    line: &str,
    is_first_line: bool,
    line_pos: usize,
    stack: &Frame,
    anchor_position: Option<usize>,
) -> Option<PatternSetMatch> {
    let scanner = grammar.rule_scanner(
        stack.rule_id,
        stack.end_rule.as_deref(),
        is_first_line,
        anchor_position == Some(line_pos),
    );
    scanner.find_at(line, line_pos)
}

fn match_injections(
    grammar: &mut Grammar,
    injections: &[InjectionRule],
    line: &str,
    is_first_line: bool,
    line_pos: usize,
    stack: &Frame,
    anchor_position: Option<usize>,
) -> Option<(PatternSetMatch, bool)> {
    let mut best: Option<PatternSetMatch> = None;
    let mut best_priority = InjectionPriority::Default;
    let mut best_rating = usize::MAX;
    let scopes = stack.content_scopes.scope_names();

    for injection in injections {
        if !injection.matcher.matches(&scopes) {
            continue;
        }
        let scanner = grammar.rule_scanner(
            injection.rule_id,
            None,
            is_first_line,
            anchor_position == Some(line_pos),
        );
        let Some(m) = scanner.find_at(line, line_pos) else {
            continue;
        };
        // Strictly earlier wins; on ties the first one (highest
        // priority, since the list is sorted) is kept
        if m.start >= best_rating {
            continue;
        }
        best_rating = m.start;
        best_priority = injection.priority;
        best = Some(m);
        if best_rating == line_pos {
            break;
        }
    }

    best.map(|m| (m, best_priority == InjectionPriority::High))
}

fn match_rule_or_injections(
    grammar: &mut Grammar,
    line: &str,
    is_first_line: bool,
    line_pos: usize,
    stack: &Frame,
    anchor_position: Option<usize>,
) -> Option<PatternSetMatch> {
    let best_match = match_rule(grammar, line, is_first_line, line_pos, stack, anchor_position);

    let injections = grammar.injections();
    if injections.is_empty() {
        return best_match;
    }
    let Some((injection_match, priority_high)) = match_injections(
        grammar,
        &injections,
        line,
        is_first_line,
        line_pos,
        stack,
        anchor_position,
    ) else {
        return best_match;
    };
    let Some(rule_match) = best_match else {
        return Some(injection_match);
    };

    // An injection wins when strictly earlier, or at the same position
    // only with HIGH priority
    if injection_match.start < rule_match.start
        || (priority_high && injection_match.start == rule_match.start)
    {
        return Some(injection_match);
    }
    Some(rule_match)
}

#[allow(clippy::too_many_arguments)]
fn handle_captures(
    grammar: &mut Grammar,
    line: &str,
    is_first_line: bool,
    stack: &Frame,
    scratch: &[FrameScratch],
    line_tokens: &mut LineTokens,
    captures: &[Option<RuleId>],
    capture_indices: &[Option<(usize, usize)>],
) {
    if captures.is_empty() {
        return;
    }
    let Some(&Some((_, max_end))) = capture_indices.first() else {
        return;
    };
    let len = captures.len().min(capture_indices.len());

    // Locally pushed capture scopes with the position they end at, so
    // that nested captures nest their scope pushes correctly
    let mut local_stack: Vec<(AttributedScopeStack, usize)> = Vec::new();

    for i in 0..len {
        let Some(capture_rule_id) = captures[i] else {
            continue;
        };
        let Some((start, end)) = capture_indices[i] else {
            continue;
        };
        if start == end {
            continue;
        }
        if start > max_end {
            break;
        }

        // Pop scopes for captures that ended before this one starts
        while let Some((scopes, end_pos)) = local_stack.last() {
            if *end_pos <= start {
                let (scopes, end_pos) = (scopes.clone(), *end_pos);
                line_tokens.produce_from_scopes(&scopes, end_pos);
                local_stack.pop();
            } else {
                break;
            }
        }
        match local_stack.last() {
            Some((scopes, _)) => {
                let scopes = scopes.clone();
                line_tokens.produce_from_scopes(&scopes, start);
            }
            None => line_tokens.produce(stack, start),
        }

        let rule = grammar.rule(capture_rule_id);
        let retokenize_with = match rule {
            Rule::Capture(r) => r.retokenize_with,
            _ => panic!("capture table entries must be capture rules"),
        };
        let name = rule.name(line, capture_indices);
        let content_name = rule.content_name(line, capture_indices);

        if retokenize_with != RuleId::NO_RULE {
            // The capture declared nested patterns: re-scan its text as
            // an embedded mini-document
            let name_scopes = stack.content_scopes.push(name.as_deref());
            let content_scopes = name_scopes.push(content_name.as_deref());
            let stack_clone = stack.push(retokenize_with, false, None, name_scopes, content_scopes);
            let mut sub_scratch = scratch.to_vec();
            sub_scratch.push(FrameScratch {
                enter_pos: Some(start),
                anchor_pos: None,
            });
            tokenize_string(
                grammar,
                &line[..end],
                is_first_line && start == 0,
                start,
                stack_clone,
                &mut sub_scratch,
                line_tokens,
                false,
            );
            continue;
        }

        if let Some(name) = name {
            let base = match local_stack.last() {
                Some((scopes, _)) => scopes.clone(),
                None => stack.content_scopes.clone(),
            };
            local_stack.push((base.push(Some(&name)), end));
        }
    }

    while let Some((scopes, end_pos)) = local_stack.pop() {
        line_tokens.produce_from_scopes(&scopes, end_pos);
    }
}

struct WhileCheckResult {
    stack: Frame,
    line_pos: usize,
    anchor_position: Option<usize>,
    is_first_line: bool,
}

/// Re-checks every begin/while frame carried over from the previous line,
/// outermost first. The first one whose while pattern no longer matches
/// is popped together with everything above it.
fn check_while(
    grammar: &mut Grammar,
    line: &str,
    mut is_first_line: bool,
    mut line_pos: usize,
    stack: Frame,
    line_tokens: &mut LineTokens,
) -> WhileCheckResult {
    let mut anchor_position = if stack.begin_rule_captured_eol {
        Some(0)
    } else {
        None
    };

    // Collect leaf to root, process root to leaf
    let mut while_frames: Vec<Frame> = Vec::new();
    let mut node = Some(Rc::clone(&stack));
    while let Some(frame) = node {
        if matches!(grammar.rule(frame.rule_id), Rule::BeginWhile(_)) {
            while_frames.push(Rc::clone(&frame));
        }
        node = frame.pop();
    }

    let mut stack = stack;
    for frame in while_frames.into_iter().rev() {
        let scanner = grammar.while_scanner(
            frame.rule_id,
            frame.end_rule.as_deref(),
            is_first_line,
            anchor_position == Some(line_pos),
        );
        match scanner.find_at(line, line_pos) {
            Some(m) => {
                if m.rule_id != RuleId::WHILE_RULE {
                    // While matched some other pattern; the region is over
                    stack = frame.pop().expect("a while frame cannot be the root");
                    break;
                }
                let while_captures = match grammar.rule(frame.rule_id) {
                    Rule::BeginWhile(r) => r.while_captures.clone(),
                    _ => unreachable!(),
                };
                line_tokens.produce(&frame, m.start);
                let scratch = vec![FrameScratch::default(); frame.depth];
                handle_captures(
                    grammar,
                    line,
                    is_first_line,
                    &frame,
                    &scratch,
                    line_tokens,
                    &while_captures,
                    &m.capture_pos,
                );
                line_tokens.produce(&frame, m.end);
                anchor_position = Some(m.end);
                if m.end > line_pos {
                    line_pos = m.end;
                    is_first_line = false;
                }
            }
            None => {
                stack = frame.pop().expect("a while frame cannot be the root");
                break;
            }
        }
    }

    WhileCheckResult {
        stack,
        line_pos,
        anchor_position,
        is_first_line,
    }
}
