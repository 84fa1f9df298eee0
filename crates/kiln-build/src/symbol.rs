use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BuildError;

/// An opaque name: a runtime name, an export, or an external dependency.
///
/// Symbols start with a letter or `_` and otherwise contain ASCII
/// alphanumerics, `_`, `.` and `-` (so `os.getenv` is a valid symbol).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
  pub fn new(text: impl Into<String>) -> Result<Self, BuildError> {
    let text = text.into();
    if is_valid(&text) {
      Ok(Self(text))
    } else {
      Err(BuildError::InvalidSymbol { symbol: text })
    }
  }

  /// Symbol from a literal that is known to be valid, such as a built-in
  /// runtime name.
  pub fn from_static(text: &'static str) -> Self {
    debug_assert!(is_valid(text), "invalid symbol literal: {text}");
    Self(text.to_string())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

fn is_valid(text: &str) -> bool {
  let mut chars = text.chars();
  match chars.next() {
    Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
    _ => return false,
  }
  chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

impl fmt::Display for Symbol {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl FromStr for Symbol {
  type Err = BuildError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::new(s)
  }
}

impl TryFrom<String> for Symbol {
  type Error = BuildError;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    Self::new(value)
  }
}

impl From<Symbol> for String {
  fn from(value: Symbol) -> Self {
    value.0
  }
}

impl AsRef<str> for Symbol {
  fn as_ref(&self) -> &str {
    &self.0
  }
}
