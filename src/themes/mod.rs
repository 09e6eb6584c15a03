//! Theme loading and scope-stack style resolution.

pub(crate) mod color;
pub(crate) mod font_style;
pub mod raw;

use serde::{Deserialize, Serialize};

pub use crate::themes::color::Color;
pub use crate::themes::font_style::FontStyle;

use crate::error::AmbraResult;
use crate::grammars::injections::matches_scope;
use crate::themes::raw::{RawTheme, TokenColorSettings};

/// A complete style with foreground, background colors and font styling
///
/// This is the runtime representation that always has concrete values.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub struct Style {
    pub foreground: Color,
    pub background: Color,
    pub font_style: FontStyle,
}

impl Default for Style {
    fn default() -> Style {
        Style {
            foreground: Color::BLACK,
            background: Color::WHITE,
            font_style: FontStyle::empty(),
        }
    }
}

/// A style modifier with optional values for theme parsing
///
/// This represents theme entries where colors and font styles are optional.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct StyleModifier {
    pub foreground: Option<Color>,
    pub background: Option<Color>,
    pub font_style: Option<FontStyle>,
}

impl StyleModifier {
    fn from_settings(settings: &TokenColorSettings) -> AmbraResult<Self> {
        let foreground = match settings.foreground() {
            Some(s) => Some(Color::from_hex(s)?),
            None => None,
        };
        let background = match settings.background() {
            Some(s) => Some(Color::from_hex(s)?),
            None => None,
        };
        let font_style = settings.font_style.as_deref().map(FontStyle::from_str);

        Ok(Self {
            foreground,
            background,
            font_style,
        })
    }

    fn apply_to(&self, style: &mut Style) {
        if let Some(foreground) = self.foreground {
            style.foreground = foreground;
        }
        if let Some(background) = self.background {
            style.background = background;
        }
        if let Some(font_style) = self.font_style {
            style.font_style = font_style;
        }
    }
}

/// One parsed theme rule: a leaf scope pattern, the ancestor patterns it
/// requires (innermost required ancestor first) and the style it applies.
#[derive(Debug, Clone)]
struct ParsedThemeRule {
    scope: String,
    parent_scopes: Vec<String>,
    /// Declaration order across all merged documents
    index: usize,
    modifier: StyleModifier,
}

impl ParsedThemeRule {
    /// Whether the required ancestors can be found among `ancestors`
    /// (outermost first), scanning from the innermost outward, each
    /// consuming the ancestors below it.
    fn parents_match(&self, ancestors: &[String]) -> bool {
        let mut upper = ancestors.len();
        'patterns: for pattern in &self.parent_scopes {
            for i in (0..upper).rev() {
                if matches_scope(pattern, &ancestors[i]) {
                    upper = i;
                    continue 'patterns;
                }
            }
            return false;
        }
        true
    }
}

/// A loaded theme: default editor style plus scope rules sorted by
/// specificity (ascending, so that later-applied rules win).
#[derive(Debug, Clone, Default)]
pub struct Theme {
    default_style: Style,
    rules: Vec<ParsedThemeRule>,
}

impl Theme {
    pub fn from_raw_theme(raw: &RawTheme) -> AmbraResult<Theme> {
        Theme::from_raw_themes(std::slice::from_ref(raw))
    }

    /// Merges theme documents in priority order, later documents override
    /// earlier ones for both the default colors and the rule list.
    pub fn from_raw_themes(themes: &[RawTheme]) -> AmbraResult<Theme> {
        let mut default_style = Style::default();
        let mut rules = Vec::new();
        let mut index = 0;

        for raw in themes {
            if let Some(foreground) = &raw.colors.foreground {
                default_style.foreground = Color::from_hex(foreground)?;
            }
            if let Some(background) = &raw.colors.background {
                default_style.background = Color::from_hex(background)?;
            }

            for rule in raw.rules() {
                let modifier = StyleModifier::from_settings(&rule.settings)?;

                // A rule without a scope restates the defaults
                if rule.scope.is_empty() {
                    modifier.apply_to(&mut default_style);
                    continue;
                }

                for scope in &rule.scope {
                    let mut segments = scope.split_whitespace();
                    let Some(mut leaf) = segments.next() else {
                        modifier.apply_to(&mut default_style);
                        continue;
                    };
                    // "source.js entity.name" requires source.js as an
                    // ancestor of an entity.name leaf
                    let mut parent_scopes = Vec::new();
                    for segment in segments {
                        parent_scopes.push(leaf.to_string());
                        leaf = segment;
                    }
                    parent_scopes.reverse();

                    rules.push(ParsedThemeRule {
                        scope: leaf.to_string(),
                        parent_scopes,
                        index,
                        modifier,
                    });
                    index += 1;
                }
            }
        }

        // Ascending specificity; match_scopes applies in order and the
        // last applied value per attribute wins
        rules.sort_by_key(|rule| {
            (
                rule.scope.matches('.').count(),
                rule.parent_scopes.len(),
                rule.index,
            )
        });

        Ok(Theme {
            default_style,
            rules,
        })
    }

    pub fn default_style(&self) -> Style {
        self.default_style
    }

    /// Resolves a scope stack (outermost first) to a concrete style.
    ///
    /// Every scope position is tested outer to inner with the scopes above
    /// it as ancestor candidates; matching rules overwrite previously
    /// applied attributes, so the innermost match wins independently for
    /// foreground, background and font style.
    pub fn match_scopes(&self, scopes: &[String]) -> Style {
        let mut style = self.default_style;

        for (i, scope) in scopes.iter().enumerate() {
            for rule in &self.rules {
                if matches_scope(&rule.scope, scope) && rule.parents_match(&scopes[..i]) {
                    rule.modifier.apply_to(&mut style);
                }
            }
        }

        style
    }
}
