use std::fmt;
use std::io::Read;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, de};

use crate::error::AmbraResult;

/// Token color settings from a theme JSON document
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TokenColorSettings {
    foreground: Option<String>,
    background: Option<String>,
    #[serde(rename = "fontStyle")]
    pub font_style: Option<String>,
}

impl TokenColorSettings {
    pub fn foreground(&self) -> Option<&str> {
        match self.foreground.as_deref() {
            Some("inherit") => None,
            other => other,
        }
    }

    pub fn background(&self) -> Option<&str> {
        match self.background.as_deref() {
            Some("inherit") => None,
            other => other,
        }
    }
}

/// Custom deserializer for the scope field: a single string (possibly
/// comma-separated) or an array of strings. Only the single-string form
/// is split on commas.
fn deserialize_scopes<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct ScopeVisitor;

    impl<'de> Visitor<'de> for ScopeVisitor {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("string or array of strings")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(value
                .split(',')
                .map(|s| s.trim().to_owned())
                .filter(|s| !s.is_empty())
                .collect())
        }

        fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
        where
            A: de::SeqAccess<'de>,
        {
            let mut vec = Vec::new();
            while let Some(item) = seq.next_element::<String>()? {
                vec.push(item);
            }
            Ok(vec)
        }
    }

    deserializer.deserialize_any(ScopeVisitor)
}

/// Global editor colors of a theme document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Colors {
    pub foreground: Option<String>,
    pub background: Option<String>,
}

// Some themes have it as editor.foreground/background some don't have the editor. prefix
impl<'de> Deserialize<'de> for Colors {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ColorsVisitor;

        impl<'de> Visitor<'de> for ColorsVisitor {
            type Value = Colors;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("struct Colors")
            }

            fn visit_map<V>(self, mut map: V) -> Result<Colors, V::Error>
            where
                V: MapAccess<'de>,
            {
                let mut foreground = None;
                let mut background = None;

                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "foreground" | "editor.foreground" => {
                            if foreground.is_none() {
                                foreground = Some(map.next_value()?);
                            } else {
                                // Skip the value if we already have one
                                let _: de::IgnoredAny = map.next_value()?;
                            }
                        }
                        "background" | "editor.background" => {
                            if background.is_none() {
                                background = Some(map.next_value()?);
                            } else {
                                let _: de::IgnoredAny = map.next_value()?;
                            }
                        }
                        _ => {
                            // Skip unknown fields
                            let _: de::IgnoredAny = map.next_value()?;
                        }
                    }
                }

                Ok(Colors {
                    foreground,
                    background,
                })
            }
        }

        deserializer.deserialize_map(ColorsVisitor)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenColorRule {
    #[serde(deserialize_with = "deserialize_scopes", default)]
    pub scope: Vec<String>,
    #[serde(default)]
    pub settings: TokenColorSettings,
}

/// Raw theme loaded from a JSON theme file
#[derive(Debug, Clone, Deserialize)]
pub struct RawTheme {
    pub name: Option<String>,
    #[serde(default)]
    pub colors: Colors,
    /// Token color rules for syntax highlighting
    #[serde(rename = "tokenColors")]
    pub token_colors: Option<Vec<TokenColorRule>>,
    /// Legacy key for token color rules, used when `tokenColors` is absent
    pub settings: Option<Vec<TokenColorRule>>,
}

impl RawTheme {
    pub fn from_reader<R: Read>(reader: R) -> AmbraResult<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn from_str(data: &str) -> AmbraResult<Self> {
        Ok(serde_json::from_str(data)?)
    }

    pub(crate) fn rules(&self) -> &[TokenColorRule] {
        self.token_colors
            .as_deref()
            .or(self.settings.as_deref())
            .unwrap_or_default()
    }
}
