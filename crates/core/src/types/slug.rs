use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

const MAX_SLUG_LEN: usize = 200;

/// URL path segment of a published post, as used in `/blog/{slug}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Slug(String);

impl Slug {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for Slug {
    type Error = CoreError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let trimmed = value.trim().trim_matches('/');
        if trimmed.is_empty() {
            return Err(CoreError::InvalidSlug("empty slug".to_string()));
        }
        if trimmed.len() > MAX_SLUG_LEN {
            return Err(CoreError::InvalidSlug(trimmed.to_string()));
        }
        if !trimmed
            .chars()
            .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '_')
        {
            return Err(CoreError::InvalidSlug(trimmed.to_string()));
        }
        Ok(Slug(trimmed.to_string()))
    }
}

impl TryFrom<String> for Slug {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Slug::try_from(value.as_str())
    }
}

impl From<Slug> for String {
    fn from(value: Slug) -> Self {
        value.0
    }
}

impl fmt::Display for Slug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::Slug;

    #[test]
    fn accepts_lowercase_with_dashes() {
        let slug = Slug::try_from("coaching-funnel_2024").unwrap();
        assert_eq!(slug.as_str(), "coaching-funnel_2024");
    }

    #[test]
    fn strips_surrounding_slashes() {
        let slug = Slug::try_from("/hello-world/").unwrap();
        assert_eq!(slug.to_string(), "hello-world");
    }

    #[test]
    fn rejects_uppercase_and_spaces() {
        assert!(Slug::try_from("Hello").is_err());
        assert!(Slug::try_from("hello world").is_err());
        assert!(Slug::try_from("   ").is_err());
    }
}
