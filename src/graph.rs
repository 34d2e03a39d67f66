//! Parent/child edges between handles, recorded as loads nest.
//!
//! Edges are stored by name on both ends. Each nested load adds one entry to
//! the parent's `depends_on` and one to the child's `dependents`; removal takes
//! out a single entry so repeated loads stay balanced with their releases.

use crate::handle::AssetHandle;

/// Records that `parent` caused `child` to be loaded.
pub(crate) fn link(parent: &AssetHandle, child: &AssetHandle) {
    parent.state().depends_on.push(child.name().to_string());
    child.state().dependents.push(parent.name().to_string());
    log::debug!("{} -> {}", parent.name(), child.name());
}

/// Drops one `parent` entry from the child's back-references.
pub(crate) fn detach_dependent(child: &AssetHandle, parent: &str) -> bool {
    remove_one(&mut child.state().dependents, parent)
}

/// Drops one `child` entry from the parent's dependency list.
pub(crate) fn detach_dependency(parent: &AssetHandle, child: &str) -> bool {
    remove_one(&mut parent.state().depends_on, child)
}

fn remove_one(list: &mut Vec<String>, name: &str) -> bool {
    match list.iter().position(|entry| entry == name) {
        Some(index) => {
            list.remove(index);
            true
        }
        None => false,
    }
}
