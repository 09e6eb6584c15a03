mod error;
mod grammars;
mod registry;
mod themes;
mod tokenizer;

pub use error::Error;
pub use grammars::raw::RawGrammar;
pub use grammars::{Grammar, GrammarSource};
pub use registry::Registry;
pub use themes::raw::RawTheme;
pub use themes::{Color, FontStyle, Style, StyleModifier, Theme};
pub use tokenizer::stack::StateStack;
pub use tokenizer::{Token, TokenizeLineResult};
