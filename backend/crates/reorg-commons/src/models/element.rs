//! Backfill target within a DDL job.
//!
//! A reorg job may build several schema objects one after another (for example
//! a column type change rewrites the column and then every index covering it).
//! Each object is an [`Element`]; reorg checkpoints are keyed by job and carry
//! the element they belong to so a resumed job can tell which object it was
//! building.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of schema object an element refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementType {
    Index,
    Column,
}

impl ElementType {
    /// Stable tag written into checkpoint records.
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementType::Index => "_idx_",
            ElementType::Column => "_col_",
        }
    }
}

/// One schema object being built by a reorg job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Element {
    pub id: i64,
    pub element_type: ElementType,
}

impl Element {
    pub const fn index(id: i64) -> Self {
        Self {
            id,
            element_type: ElementType::Index,
        }
    }

    pub const fn column(id: i64) -> Self {
        Self {
            id,
            element_type: ElementType::Column,
        }
    }

    pub fn is_index(&self) -> bool {
        self.element_type == ElementType::Index
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.element_type.as_str(), self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_display() {
        assert_eq!(Element::index(333).to_string(), "_idx_333");
        assert_eq!(Element::column(123).to_string(), "_col_123");
    }

    #[test]
    fn test_elements_with_same_id_differ_by_type() {
        assert_ne!(Element::index(1), Element::column(1));
    }
}
