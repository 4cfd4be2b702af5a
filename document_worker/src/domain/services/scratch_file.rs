use std::{
    io::Write,
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;

const SCRATCH_FILE_PREFIX: &str = "document-";
const DEFAULT_EXTENSION: &str = "pdf";

/// A private copy of a downloaded file, owned by one processing run
///
/// Must be released with `release` once the conversion is over.
/// If it is dropped without being released (panic, cancelled task) the file is still removed.
#[derive(Debug)]
pub struct ScratchFile {
    file: NamedTempFile,
}

impl ScratchFile {
    /// Writes the bytes into a new uniquely named file of the scratch directory
    ///
    /// The directory is created if it does not exist.
    pub fn stage(
        scratch_directory: &Path,
        extension: Option<&str>,
        bytes: &[u8],
    ) -> std::io::Result<Self> {
        std::fs::create_dir_all(scratch_directory)?;

        let suffix = format!(".{}", extension.unwrap_or(DEFAULT_EXTENSION));
        let mut file = tempfile::Builder::new()
            .prefix(SCRATCH_FILE_PREFIX)
            .suffix(&suffix)
            .tempfile_in(scratch_directory)?;

        file.write_all(bytes)?;
        file.flush()?;

        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Removes the file
    ///
    /// # Returns
    /// The path of the removed file
    pub fn release(self) -> std::io::Result<PathBuf> {
        let path = self.file.path().to_path_buf();
        self.file.close()?;

        Ok(path)
    }
}
