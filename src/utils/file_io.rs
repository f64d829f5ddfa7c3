use std::fs::{create_dir_all, File, OpenOptions};
use std::path::Path;

use tracing::debug;

use crate::Result;
use crate::StorageError;

pub fn create_parent_dir_if_not_exist(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            debug!(?parent, "creating parent dir");
            create_dir_all(parent).map_err(StorageError::IoError)?;
        }
    }
    Ok(())
}

pub fn open_file_for_append(path: impl AsRef<Path>) -> Result<File> {
    let path = path.as_ref();
    create_parent_dir_if_not_exist(path)?;
    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .map_err(StorageError::IoError)?;
    Ok(file)
}
