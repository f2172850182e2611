//! Category labels shared by all images of a project.

use std::collections::{BTreeMap, HashMap};

/// Identifier of an annotation category.
pub type CategoryId = u32;

/// Category id to display name, as stored in `project.json`.
pub type Labels = BTreeMap<CategoryId, String>;

/// Labels of a freshly created project.
pub fn default_labels() -> Labels {
    Labels::from([(0, "Dead Coral".to_string())])
}

/// Reverse lookup from label name to id.
///
/// When two ids share a name the lowest id wins.
pub fn name_index(labels: &Labels) -> HashMap<String, CategoryId> {
    let mut index = HashMap::with_capacity(labels.len());
    for (id, name) in labels {
        index.entry(name.clone()).or_insert(*id);
    }
    index
}
