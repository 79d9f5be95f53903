use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::{Error, Result};

/// An immutable JavaScript handler script, with the path it was loaded from if any.
///
/// The origin is used as the module name, so script stack traces point at the file.
#[derive(Debug, Clone)]
pub struct Script {
    /// The script content
    content: Arc<str>,
    /// where the script was read from
    origin: Option<PathBuf>,
}

impl Script {
    /// Create a script from a string with no origin
    pub fn from_content(content: impl Into<String>) -> Self {
        Self {
            content: Arc::from(content.into()),
            origin: None,
        }
    }

    /// Create a script by reading from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|source| Error::ScriptRead {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(Self {
            content: Arc::from(content),
            origin: Some(path.to_path_buf()),
        })
    }

    /// Get the script content
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Get the path the script was read from, if any
    pub fn origin(&self) -> Option<&Path> {
        self.origin.as_deref()
    }

    /// The name the script is compiled under: its origin, or `fallback`.
    pub(crate) fn module_name(&self, fallback: &str) -> String {
        match &self.origin {
            Some(path) => path.display().to_string(),
            None => fallback.to_string(),
        }
    }
}

impl From<String> for Script {
    fn from(content: String) -> Self {
        Self::from_content(content)
    }
}

impl From<&str> for Script {
    fn from(content: &str) -> Self {
        Self::from_content(content)
    }
}

impl TryFrom<&Path> for Script {
    type Error = Error;
    fn try_from(path: &Path) -> Result<Self> {
        Self::from_file(path)
    }
}
