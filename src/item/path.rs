//! Materialized path construction.

use super::MAX_NAME_LENGTH;
use crate::{CabinetError, Result};

/// Compute an item's path from its name and its parent's path.
///
/// Root items get `/name`; everything else gets `parent_path/name`.
pub fn build_path(name: &str, parent_path: Option<&str>) -> String {
    match parent_path {
        None => format!("/{name}"),
        Some(parent) => format!("{parent}/{name}"),
    }
}

/// Check that a name can be used as a path segment.
pub fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(CabinetError::Validation("name must not be empty".to_string()));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(CabinetError::Validation(format!(
            "name must be at most {MAX_NAME_LENGTH} characters"
        )));
    }
    if name.contains('/') {
        return Err(CabinetError::Validation(
            "name must not contain '/'".to_string(),
        ));
    }
    if name == "." || name == ".." {
        return Err(CabinetError::Validation(format!("'{name}' is a reserved name")));
    }
    Ok(())
}
