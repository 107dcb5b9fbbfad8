//! Reserved lifecycle keywords.
//!
//! Only three exact tokens are recognised. Anything else, including a keyword embedded in a
//! longer sentence, is not a command.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnippetCommand {
    Confirm,
    Cancel,
    Extend,
}

impl SnippetCommand {
    /// Recognise a reserved keyword after stripping mention tokens (`<@U123>`), surrounding
    /// inline markup and whitespace. Matching is case-insensitive on the whole remaining text.
    pub fn parse(text: &str) -> Option<Self> {
        let bare = strip_mentions(text);
        let token = bare
            .trim()
            .trim_matches(|c: char| matches!(c, '`' | '*' | '_' | '~') || c.is_whitespace());
        match token.to_ascii_lowercase().as_str() {
            "confirm" => Some(Self::Confirm),
            "cancel" => Some(Self::Cancel),
            "extend" => Some(Self::Extend),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Confirm => "confirm",
            Self::Cancel => "cancel",
            Self::Extend => "extend",
        }
    }
}

impl fmt::Display for SnippetCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn strip_mentions(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<@") {
        out.push_str(&rest[..start]);
        match rest[start..].find('>') {
            Some(end) => {
                out.push(' ');
                rest = &rest[start + end + 1..];
            }
            None => {
                rest = &rest[start..];
                break;
            }
        }
    }
    out.push_str(rest);
    out
}
