use std::fmt;

use crate::error::InvalidLoginId;

const LOGIN_DIRECTIVE: &str = "#login";

/// Identity a client asserts once per connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LoginId(String);

impl LoginId {
    /// Builds a login id from operator or wire input.
    ///
    /// Every `#login` occurrence is removed and surrounding whitespace is
    /// trimmed, so `#loginalice`, `#login alice` and `alice` all produce
    /// `alice`. Nothing left over is an error.
    pub fn parse(candidate: &str) -> Result<Self, InvalidLoginId> {
        let stripped = candidate.replace(LOGIN_DIRECTIVE, "");
        let trimmed = stripped.trim();
        if trimmed.is_empty() {
            return Err(InvalidLoginId);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LoginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for LoginId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
