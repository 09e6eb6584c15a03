//! Persistent, structurally shared stacks carried across lines.

use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::grammars::rule::RuleId;

/// Immutable linked list of scope names, outermost first when flattened.
/// Pushing allocates one node; tails are shared.
#[derive(Debug, Clone)]
pub(crate) struct ScopeStack {
    node: Rc<ScopeNode>,
}

#[derive(Debug)]
struct ScopeNode {
    parent: Option<ScopeStack>,
    name: String,
}

impl ScopeStack {
    pub(crate) fn root(name: &str) -> Self {
        ScopeStack {
            node: Rc::new(ScopeNode {
                parent: None,
                name: name.to_string(),
            }),
        }
    }

    pub(crate) fn push(&self, name: &str) -> Self {
        ScopeStack {
            node: Rc::new(ScopeNode {
                parent: Some(self.clone()),
                name: name.to_string(),
            }),
        }
    }

    /// The innermost scope name
    pub(crate) fn name(&self) -> &str {
        &self.node.name
    }

    /// Flattens to a list, outermost first
    pub(crate) fn to_vec(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut current = Some(self);
        while let Some(stack) = current {
            out.push(stack.node.name.clone());
            current = stack.node.parent.as_ref();
        }
        out.reverse();
        out
    }
}

impl PartialEq for ScopeStack {
    fn eq(&self, other: &Self) -> bool {
        let mut a = Some(self);
        let mut b = Some(other);
        while let (Some(x), Some(y)) = (a, b) {
            if Rc::ptr_eq(&x.node, &y.node) {
                return true;
            }
            if x.node.name != y.node.name {
                return false;
            }
            a = x.node.parent.as_ref();
            b = y.node.parent.as_ref();
        }
        a.is_none() && b.is_none()
    }
}

impl Eq for ScopeStack {}

/// Scope stack where every frame also carries an opaque attributes tag.
/// Each frame records the full scope path up to itself, so the leaf frame
/// knows the complete flattened scope list.
#[derive(Debug, Clone)]
pub(crate) struct AttributedScopeStack {
    node: Rc<AttributedNode>,
}

#[derive(Debug)]
struct AttributedNode {
    parent: Option<AttributedScopeStack>,
    scope_path: ScopeStack,
    attributes: u32,
}

impl AttributedScopeStack {
    pub(crate) fn root(scope_name: &str, attributes: u32) -> Self {
        AttributedScopeStack {
            node: Rc::new(AttributedNode {
                parent: None,
                scope_path: ScopeStack::root(scope_name),
                attributes,
            }),
        }
    }

    /// Pushes a scope path, possibly space-separated into several frames.
    /// `None` and empty strings push nothing.
    pub(crate) fn push(&self, scope_path: Option<&str>) -> Self {
        let Some(scope_path) = scope_path else {
            return self.clone();
        };
        let mut result = self.clone();
        for scope in scope_path.split(' ').filter(|s| !s.is_empty()) {
            result = AttributedScopeStack {
                node: Rc::new(AttributedNode {
                    scope_path: result.node.scope_path.push(scope),
                    attributes: result.node.attributes,
                    parent: Some(result),
                }),
            };
        }
        result
    }

    /// All scope names, outermost first
    pub(crate) fn scope_names(&self) -> Vec<String> {
        self.node.scope_path.to_vec()
    }

    fn scope_name(&self) -> &str {
        self.node.scope_path.name()
    }
}

impl PartialEq for AttributedScopeStack {
    fn eq(&self, other: &Self) -> bool {
        let mut a = Some(self);
        let mut b = Some(other);
        loop {
            match (a, b) {
                (None, None) => return true,
                (Some(x), Some(y)) => {
                    if Rc::ptr_eq(&x.node, &y.node) {
                        return true;
                    }
                    if x.scope_name() != y.scope_name() || x.node.attributes != y.node.attributes {
                        return false;
                    }
                    a = x.node.parent.as_ref();
                    b = y.node.parent.as_ref();
                }
                _ => return false,
            }
        }
    }
}

impl Eq for AttributedScopeStack {}

impl Hash for AttributedScopeStack {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let mut current = Some(self);
        while let Some(stack) = current {
            stack.scope_name().hash(state);
            stack.node.attributes.hash(state);
            current = stack.node.parent.as_ref();
        }
    }
}

pub(crate) type Frame = Rc<StackFrame>;

/// One pushed begin/end or begin/while activation.
///
/// Deeply immutable: per-line scratch positions (enter/anchor) live in a
/// call-local side table inside the tokenizer, never on these nodes, so a
/// continuation can be shared between tokenization sessions.
#[derive(Debug)]
pub(crate) struct StackFrame {
    pub parent: Option<Frame>,
    /// Root frame has depth 1
    pub depth: usize,
    pub rule_id: RuleId,
    /// Whether the begin match consumed the synthetic trailing newline
    pub begin_rule_captured_eol: bool,
    /// End/while source with back-references resolved, when the rule has any
    pub end_rule: Option<String>,
    /// Scopes produced by the rule's name, covering begin/end text too
    pub name_scopes: AttributedScopeStack,
    /// Scopes for the text between begin and end (adds `contentName`)
    pub content_scopes: AttributedScopeStack,
}

impl StackFrame {
    pub(crate) fn root(rule_id: RuleId, scopes: AttributedScopeStack) -> Frame {
        Rc::new(StackFrame {
            parent: None,
            depth: 1,
            rule_id,
            begin_rule_captured_eol: false,
            end_rule: None,
            name_scopes: scopes.clone(),
            content_scopes: scopes,
        })
    }

    pub(crate) fn push(
        self: &Frame,
        rule_id: RuleId,
        begin_rule_captured_eol: bool,
        end_rule: Option<String>,
        name_scopes: AttributedScopeStack,
        content_scopes: AttributedScopeStack,
    ) -> Frame {
        Rc::new(StackFrame {
            parent: Some(Rc::clone(self)),
            depth: self.depth + 1,
            rule_id,
            begin_rule_captured_eol,
            end_rule,
            name_scopes,
            content_scopes,
        })
    }

    pub(crate) fn pop(self: &Frame) -> Option<Frame> {
        self.parent.clone()
    }

    /// Pops, but never past the root
    pub(crate) fn safe_pop(self: &Frame) -> Frame {
        self.parent.clone().unwrap_or_else(|| Rc::clone(self))
    }

    /// Same frame with different content scopes
    pub(crate) fn with_content_scopes(self: &Frame, content_scopes: AttributedScopeStack) -> Frame {
        Rc::new(StackFrame {
            parent: self.parent.clone(),
            depth: self.depth,
            rule_id: self.rule_id,
            begin_rule_captured_eol: self.begin_rule_captured_eol,
            end_rule: self.end_rule.clone(),
            name_scopes: self.name_scopes.clone(),
            content_scopes,
        })
    }

    /// Same frame with a freshly resolved end rule
    pub(crate) fn with_end_rule(self: &Frame, end_rule: String) -> Frame {
        Rc::new(StackFrame {
            parent: self.parent.clone(),
            depth: self.depth,
            rule_id: self.rule_id,
            begin_rule_captured_eol: self.begin_rule_captured_eol,
            end_rule: Some(end_rule),
            name_scopes: self.name_scopes.clone(),
            content_scopes: self.content_scopes.clone(),
        })
    }
}

/// Opaque tokenizer continuation returned by one line and fed to the next.
///
/// An immutable value: cloning is cheap and sharing across sessions is
/// safe. The default value is the initial state.
#[derive(Debug, Clone, Default)]
pub struct StateStack {
    pub(crate) frame: Option<Frame>,
}

impl StateStack {
    /// The sentinel state for the first line of a document
    pub const fn initial() -> Self {
        StateStack { frame: None }
    }

    pub fn is_initial(&self) -> bool {
        self.frame.is_none()
    }

    /// Number of open frames; a fresh root counts as 1
    pub fn depth(&self) -> usize {
        self.frame.as_ref().map_or(0, |f| f.depth)
    }
}

impl PartialEq for StateStack {
    fn eq(&self, other: &Self) -> bool {
        // Content scopes are compared at the top only; below it they are
        // implied by the rule chain
        if let (Some(x), Some(y)) = (&self.frame, &other.frame)
            && x.content_scopes != y.content_scopes
        {
            return false;
        }
        let (mut a, mut b) = (&self.frame, &other.frame);
        loop {
            match (a, b) {
                (None, None) => return true,
                (Some(x), Some(y)) => {
                    if Rc::ptr_eq(x, y) {
                        return true;
                    }
                    if x.depth != y.depth || x.rule_id != y.rule_id || x.end_rule != y.end_rule {
                        return false;
                    }
                    a = &x.parent;
                    b = &y.parent;
                }
                _ => return false,
            }
        }
    }
}

impl Eq for StateStack {}

impl Hash for StateStack {
    fn hash<H: Hasher>(&self, state: &mut H) {
        if let Some(top) = &self.frame {
            top.content_scopes.hash(state);
        }
        let mut current = &self.frame;
        while let Some(frame) = current {
            frame.depth.hash(state);
            frame.rule_id.0.hash(state);
            frame.end_rule.hash(state);
            current = &frame.parent;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of<T: Hash>(value: &T) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn scope_stack_flattens_outermost_first() {
        let stack = ScopeStack::root("source.js")
            .push("string.quoted")
            .push("punctuation");
        assert_eq!(
            stack.to_vec(),
            vec!["source.js", "string.quoted", "punctuation"]
        );
        assert_eq!(stack.name(), "punctuation");
    }

    #[test]
    fn equal_push_sequences_from_different_roots_compare_equal() {
        let a = AttributedScopeStack::root("source.js", 0).push(Some("string meta"));
        let b = AttributedScopeStack::root("source.js", 0).push(Some("string meta"));
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));

        let c = AttributedScopeStack::root("source.js", 0).push(Some("string other"));
        assert_ne!(a, c);
        assert_ne!(hash_of(&a), hash_of(&c));
    }

    #[test]
    fn space_separated_push_creates_one_frame_per_scope() {
        let stack = AttributedScopeStack::root("source.js", 0).push(Some("a.b c.d"));
        assert_eq!(stack.scope_names(), vec!["source.js", "a.b", "c.d"]);
    }

    #[test]
    fn pushing_none_is_a_noop() {
        let stack = AttributedScopeStack::root("source.js", 0);
        assert_eq!(stack.push(None), stack);
        assert_eq!(stack.push(Some("")), stack);
    }

    #[test]
    fn initial_state_is_empty() {
        assert!(StateStack::initial().is_initial());
        assert_eq!(StateStack::initial().depth(), 0);
        assert_eq!(StateStack::initial(), StateStack::default());
    }

    #[test]
    fn state_stacks_compare_structurally() {
        let scopes = AttributedScopeStack::root("source.js", 0);
        let root_a = StackFrame::root(RuleId(1), scopes.clone());
        let root_b = StackFrame::root(RuleId(1), scopes.clone());

        let a = StateStack {
            frame: Some(root_a.push(RuleId(2), false, None, scopes.clone(), scopes.clone())),
        };
        let b = StateStack {
            frame: Some(root_b.push(RuleId(2), false, None, scopes.clone(), scopes.clone())),
        };
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));

        let c = StateStack {
            frame: Some(root_a.push(RuleId(3), false, None, scopes.clone(), scopes.clone())),
        };
        assert_ne!(a, c);

        let d = StateStack {
            frame: Some(root_a.push(
                RuleId(2),
                false,
                Some("</div>".into()),
                scopes.clone(),
                scopes.clone(),
            )),
        };
        assert_ne!(a, d);
    }

    #[test]
    fn safe_pop_never_pops_the_root() {
        let scopes = AttributedScopeStack::root("source.js", 0);
        let root = StackFrame::root(RuleId(1), scopes.clone());
        let pushed = root.push(RuleId(2), false, None, scopes.clone(), scopes);
        assert_eq!(pushed.safe_pop().depth, 1);
        assert_eq!(root.safe_pop().depth, 1);
        assert!(root.pop().is_none());
    }
}
