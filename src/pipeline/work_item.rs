use std::collections::HashSet;

use crate::error::AppError;

/// One artifact to generate. The name doubles as the output filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    name: String,
}

impl WorkItem {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Trims and checks raw names: non-empty list, non-empty names, no
/// duplicates, and each name a single path component.
pub fn validate_work_items<S: AsRef<str>>(raw_names: &[S]) -> Result<Vec<WorkItem>, AppError> {
    if raw_names.is_empty() {
        return Err(AppError::Validation(
            "work item list must not be empty".into(),
        ));
    }

    let mut seen = HashSet::with_capacity(raw_names.len());
    let mut items = Vec::with_capacity(raw_names.len());

    for (index, raw) in raw_names.iter().enumerate() {
        let name = raw.as_ref().trim();

        if name.is_empty() {
            return Err(AppError::Validation(format!(
                "work item #{} has an empty name",
                index + 1
            )));
        }
        if name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(AppError::Validation(format!(
                "work item name '{name}' must be a plain file name"
            )));
        }
        if !seen.insert(name.to_string()) {
            return Err(AppError::Validation(format!(
                "duplicate work item name '{name}'"
            )));
        }

        items.push(WorkItem {
            name: name.to_string(),
        });
    }

    Ok(items)
}
