//! News categories.
//!
//! The category set is fixed when the server starts. Names are compared
//! after trimming and lower-casing, so `" Tech"` and `"tech"` are the same
//! category.

use std::collections::BTreeSet;
use thiserror::Error;

/// Maximum category name length, in bytes.
pub const MAX_CATEGORY_NAME_LENGTH: usize = 64;

/// Categories used when configuration does not name any.
pub const DEFAULT_CATEGORIES: [&str; 6] = [
    "tech",
    "sports",
    "culture",
    "politics",
    "economy",
    "entertainment",
];

/// Reasons a category set cannot be built.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CategoryError {
    #[error("Invalid category name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("At least one category must be configured")]
    Empty,
}

/// Normalize a category name for lookup.
#[must_use]
pub fn normalize_category(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Validate a normalized category name.
///
/// # Errors
///
/// Returns an error message if the category name is invalid.
pub fn validate_category_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("Category name cannot be empty");
    }
    if name.len() > MAX_CATEGORY_NAME_LENGTH {
        return Err("Category name too long");
    }
    if name.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err("Category name contains whitespace or control characters");
    }
    Ok(())
}

/// The immutable set of configured categories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorySet {
    names: BTreeSet<String>,
}

impl CategorySet {
    /// Build a category set, normalizing and de-duplicating names.
    ///
    /// # Errors
    ///
    /// Returns an error if a name is invalid or the set is empty.
    pub fn new<I, S>(names: I) -> Result<Self, CategoryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = BTreeSet::new();
        for raw in names {
            let name = normalize_category(raw.as_ref());
            validate_category_name(&name).map_err(|reason| CategoryError::InvalidName {
                name: raw.as_ref().to_string(),
                reason,
            })?;
            set.insert(name);
        }

        if set.is_empty() {
            return Err(CategoryError::Empty);
        }

        Ok(Self { names: set })
    }

    /// Look up a category, returning its normalized name if configured.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<&str> {
        self.names
            .get(normalize_category(name).as_str())
            .map(String::as_str)
    }

    /// All categories in sorted order.
    #[must_use]
    pub fn sorted(&self) -> Vec<String> {
        self.names.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for CategorySet {
    fn default() -> Self {
        Self {
            names: DEFAULT_CATEGORIES.iter().map(|c| (*c).to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_set_normalizes() {
        let set = CategorySet::new(["Tech", " sports ", "tech", "Política"]).unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(set.resolve("TECH"), Some("tech"));
        assert_eq!(set.resolve("política"), Some("política"));
        assert_eq!(set.resolve("weather"), None);
        assert_eq!(set.sorted(), vec!["política", "sports", "tech"]);
    }

    #[test]
    fn test_category_name_validation() {
        assert!(validate_category_name("culture").is_ok());
        assert!(validate_category_name("").is_err());
        assert!(validate_category_name("two words").is_err());

        let long_name = "a".repeat(MAX_CATEGORY_NAME_LENGTH + 1);
        assert!(validate_category_name(&long_name).is_err());
    }

    #[test]
    fn test_empty_category_set_is_rejected() {
        assert_eq!(
            CategorySet::new(Vec::<String>::new()),
            Err(CategoryError::Empty)
        );
        assert!(matches!(
            CategorySet::new(["  "]),
            Err(CategoryError::InvalidName { .. })
        ));
    }

    #[test]
    fn test_default_categories() {
        let set = CategorySet::default();
        assert_eq!(set.len(), DEFAULT_CATEGORIES.len());
        assert_eq!(set.resolve("Economy"), Some("economy"));
    }
}
