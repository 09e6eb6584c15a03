use std::fmt::{Debug, Formatter};

use onig::{RegSet, RegexOptions, SearchOptions};

use crate::grammars::rule::{NEVER_MATCH, RuleId};

#[derive(Debug, PartialEq, Eq, Clone)]
pub(crate) struct PatternSetMatch {
    pub rule_id: RuleId,
    pub start: usize,
    pub end: usize,
    /// Byte offsets of every capture group, group 0 first
    pub capture_pos: Vec<Option<(usize, usize)>>,
}

/// An eagerly compiled pattern set for batch regex matching using onig RegSet.
///
/// Patterns that fail to compile are replaced with a never-matching
/// sentinel so that one malformed pattern cannot take down the whole
/// grammar.
pub(crate) struct PatternSet {
    rule_ids: Vec<RuleId>,
    regset: Option<RegSet>,
}

impl PatternSet {
    pub(crate) fn new(items: Vec<(RuleId, String)>) -> Self {
        if items.is_empty() {
            return Self {
                rule_ids: Vec::new(),
                regset: None,
            };
        }

        let (rule_ids, mut patterns): (Vec<_>, Vec<_>) = items.into_iter().unzip();
        for pattern in &mut patterns {
            if let Err(err) = onig::Regex::new(pattern) {
                log::warn!("invalid regex pattern {pattern:?}: {err}");
                *pattern = NEVER_MATCH.to_string();
            }
        }
        let pattern_strs: Vec<&str> = patterns.iter().map(|s| s.as_str()).collect();

        let regset =
            match RegSet::with_options(&pattern_strs, RegexOptions::REGEX_OPTION_CAPTURE_GROUP) {
                Ok(regset) => Some(regset),
                Err(err) => {
                    log::warn!(
                        "failed to compile pattern set with {} patterns: {err:?}",
                        pattern_strs.len()
                    );
                    None
                }
            };

        Self { rule_ids, regset }
    }

    pub(crate) fn find_at(&self, text: &str, pos: usize) -> Option<PatternSetMatch> {
        let regset = self.regset.as_ref()?;

        // We need to specify pos/text.len() because some regex might do lookbehind
        if let Some((pattern_index, captures)) = regset.captures_with_options(
            text,       // Full text (not sliced)
            pos,        // Start searching from this position
            text.len(), // Search to end of text
            onig::RegSetLead::Position,
            SearchOptions::SEARCH_OPTION_NONE,
        ) && let Some((match_start, match_end)) = captures.pos(0)
        {
            // Capture positions are already absolute byte offsets
            let capture_pos: Vec<Option<(usize, usize)>> =
                (0..captures.len()).map(|i| captures.pos(i)).collect();

            return Some(PatternSetMatch {
                rule_id: self.rule_ids[pattern_index],
                start: match_start,
                end: match_end,
                capture_pos,
            });
        }

        None
    }
}

impl Debug for PatternSet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "PatternSet({} rules)", self.rule_ids.len())
    }
}
