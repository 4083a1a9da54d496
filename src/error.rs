use std::{io, path::PathBuf};

use crate::compile::Arch;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("npy: {0}")]
    Npy(String),
    #[error("model: {0}")]
    Model(String),
    #[error("dataset: {0}")]
    Dataset(String),
    #[error("shape mismatch: {0}")]
    Shape(String),
    #[error("architecture `{0}` is not supported on this machine")]
    UnsupportedArch(Arch),
    #[error("invalid option: {0}")]
    Options(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn open(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Open { path: path.into(), source }
    }

    /// Whether the error was caused by a file that does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Open { source, .. } | Self::Io(source) => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}
