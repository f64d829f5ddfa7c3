//! Repository backends.
//!
//! `mem` keeps everything in process and is shared between brokers by
//! handing out clones of one `Arc<MemoryStorage>`. `sled_adapter` persists to disk.

mod mem;
mod sled_adapter;

pub use mem::*;
pub use sled_adapter::*;

use std::collections::BTreeSet;

use crate::constants::ROOT_PATH;
use crate::utils::path::node_name;
use crate::utils::path::parent_path;

/// Immediate child names of `parent`. `paths` must already be narrowed to
/// keys starting with [`child_prefix`].
pub(crate) fn child_names<'a>(
    parent: &str,
    paths: impl IntoIterator<Item = &'a str>,
) -> BTreeSet<String> {
    paths
        .into_iter()
        .filter(|p| *p != ROOT_PATH && parent_path(p) == Some(parent))
        .map(|p| node_name(p).to_string())
        .collect()
}

pub(crate) fn child_prefix(parent: &str) -> String {
    if parent == ROOT_PATH {
        ROOT_PATH.to_string()
    } else {
        format!("{parent}/")
    }
}
