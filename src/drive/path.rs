//! Materialized path computation.
//!
//! A node's path is `"/" + name` at the drive root and
//! `parent.path + "/" + name` below it. Names may not contain the
//! separator, so prefix checks on paths never match across name
//! boundaries.

use crate::{DriveError, Result};

use super::MAX_NAME_LENGTH;

/// Path separator.
pub const SEPARATOR: char = '/';

/// Pure path computations for the node tree.
pub struct PathMaterializer;

impl PathMaterializer {
    /// Validate a folder or file name.
    pub fn validate_name(name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(DriveError::Validation("name cannot be empty".to_string()));
        }
        if name.chars().count() > MAX_NAME_LENGTH {
            return Err(DriveError::Validation(format!(
                "name must be at most {MAX_NAME_LENGTH} characters"
            )));
        }
        if name.contains(SEPARATOR) {
            return Err(DriveError::Validation(format!(
                "name cannot contain '{SEPARATOR}'"
            )));
        }
        if name.chars().any(|c| c.is_control()) {
            return Err(DriveError::Validation(
                "name cannot contain control characters".to_string(),
            ));
        }
        if name == "." || name == ".." {
            return Err(DriveError::Validation(format!("'{name}' is a reserved name")));
        }
        Ok(())
    }

    /// Compute the path of a node called `name` under `parent_path`
    /// (`None` for the drive root).
    pub fn compute_path(name: &str, parent_path: Option<&str>) -> Result<String> {
        Self::validate_name(name)?;
        Ok(match parent_path {
            Some(parent) => format!("{parent}{SEPARATOR}{name}"),
            None => format!("{SEPARATOR}{name}"),
        })
    }

    /// Whether `path` is `ancestor` itself or lies anywhere below it.
    pub fn is_within(path: &str, ancestor: &str) -> bool {
        match path.strip_prefix(ancestor) {
            Some("") => true,
            Some(rest) => rest.starts_with(SEPARATOR),
            None => false,
        }
    }

    /// Number of segments in a path (`"/a/b"` has depth 2).
    pub fn depth(path: &str) -> usize {
        path.matches(SEPARATOR).count()
    }
}
