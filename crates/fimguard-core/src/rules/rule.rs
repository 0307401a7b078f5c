//! A single path rule

use crate::attributes::{AttrSet, FileType};
use crate::error::{GuardError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Rule kind, listed from weakest to strongest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Monitor the path and everything below it
    Select,
    /// Monitor exactly this path
    Equal,
    /// Do not monitor the path or anything below it
    Negate,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::Equal => "equal",
            Self::Negate => "negate",
        }
    }

    /// Prefix used when rules are printed
    pub fn sigil(&self) -> &'static str {
        match self {
            Self::Select => "",
            Self::Equal => "=",
            Self::Negate => "!",
        }
    }
}

/// Set of file types a rule applies to; empty means every type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TypeRestriction(u8);

const ALL_TYPES: [FileType; 7] = [
    FileType::Regular,
    FileType::Directory,
    FileType::Symlink,
    FileType::BlockDevice,
    FileType::CharDevice,
    FileType::Fifo,
    FileType::Socket,
];

impl TypeRestriction {
    pub const ANY: TypeRestriction = TypeRestriction(0);

    pub fn of(types: &[FileType]) -> Self {
        TypeRestriction(types.iter().fold(0, |acc, t| acc | Self::bit(*t)))
    }

    /// Parse a list of type characters such as `f,d` or `fl`
    pub fn parse(spec: &str) -> Result<Self> {
        let mut bits = 0u8;
        for c in spec.chars().filter(|c| *c != ',' && !c.is_whitespace()) {
            let t = FileType::from_char(c)
                .ok_or_else(|| GuardError::config(spec, format!("invalid file type '{}'", c)))?;
            bits |= Self::bit(t);
        }
        Ok(TypeRestriction(bits))
    }

    pub fn allows(&self, file_type: FileType) -> bool {
        self.0 == 0 || self.0 & Self::bit(file_type) != 0
    }

    pub fn is_any(&self) -> bool {
        self.0 == 0
    }

    fn bit(t: FileType) -> u8 {
        1 << ALL_TYPES.iter().position(|x| *x == t).unwrap_or(0)
    }
}

impl fmt::Display for TypeRestriction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_any() {
            return f.write_str("*");
        }
        let chars: Vec<String> = ALL_TYPES
            .iter()
            .filter(|t| self.allows(**t))
            .map(|t| t.as_char().to_string())
            .collect();
        f.write_str(&chars.join(","))
    }
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub pattern: String,
    pub kind: RuleKind,
    pub attrs: AttrSet,
    pub restriction: TypeRestriction,
    /// Where the rule was defined, e.g. `rules[2]`
    pub location: String,
    regex: Regex,
}

impl Rule {
    /// Compile a rule. Select and negate patterns are anchored at the start
    /// only; equal patterns are anchored at both ends.
    pub fn compile(
        pattern: &str,
        kind: RuleKind,
        attrs: AttrSet,
        restriction: TypeRestriction,
        location: &str,
    ) -> Result<Self> {
        if !pattern.starts_with('/') {
            return Err(GuardError::InvalidRule {
                location: location.to_string(),
                message: format!("'{}' is not an absolute path", pattern),
            });
        }
        let anchored = match kind {
            RuleKind::Equal => format!("^(?:{})$", pattern),
            RuleKind::Select | RuleKind::Negate => format!("^(?:{})", pattern),
        };
        let regex = Regex::new(&anchored).map_err(|e| GuardError::InvalidRule {
            location: location.to_string(),
            message: format!("error in regular expression '{}': {}", pattern, e),
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            kind,
            attrs,
            restriction,
            location: location.to_string(),
            regex,
        })
    }

    pub fn matches(&self, path: &str, file_type: FileType) -> bool {
        self.restriction.allows(file_type) && self.regex.is_match(path)
    }

    /// Tree node the rule belongs to: the deepest directory fully spelled
    /// out by the literal prefix of the pattern.
    pub fn node_path(&self) -> String {
        node_path_for(&self.pattern)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.sigil(), self.pattern)?;
        if self.kind != RuleKind::Negate {
            write!(f, " {}", self.attrs)?;
        }
        if !self.restriction.is_any() {
            write!(f, " f={}", self.restriction)?;
        }
        write!(f, " ({})", self.location)
    }
}

const META: &[char] = &['.', '^', '$', '*', '+', '?', '(', ')', '[', ']', '{', '}', '|'];

/// Literal text at the start of a pattern, the rest of the pattern
fn literal_prefix(pattern: &str) -> (String, &str) {
    let mut literal = String::new();
    let mut chars = pattern.char_indices().peekable();
    while let Some((idx, c)) = chars.next() {
        if c == '\\' {
            match chars.peek() {
                Some((_, next)) if !next.is_alphanumeric() => {
                    literal.push(*next);
                    chars.next();
                }
                _ => return (literal, &pattern[idx..]),
            }
        } else if META.contains(&c) {
            return (literal, &pattern[idx..]);
        } else {
            literal.push(c);
        }
    }
    (literal, "")
}

pub(crate) fn node_path_for(pattern: &str) -> String {
    let (literal, rest) = literal_prefix(pattern);
    let dir = if rest.is_empty() || rest == "$" {
        literal.as_str()
    } else {
        match literal.rfind('/') {
            Some(idx) => &literal[..idx],
            None => "",
        }
    };
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        "/".to_string()
    } else {
        dir.to_string()
    }
}
