use std::{path::PathBuf, sync::Arc};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    archive::ArchiveBuilder,
    config::{ServerConfig, STATIC_DIR_NAME},
    size_cache::SizeCache,
};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to resolve shared directory '{path}': {source}")]
    Resolve {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("shared path '{0}' is not a directory")]
    NotADirectory(PathBuf),
}

pub type SharedState = Arc<ServerState>;

/// Everything request handlers share, built once at startup.
pub struct ServerState {
    /// Canonical shared root; every served path must stay under it.
    pub root_dir: PathBuf,
    pub static_dir: PathBuf,
    pub show_hidden: bool,
    pub highlight: bool,
    pub sizes: SizeCache,
    pub archives: ArchiveBuilder,
}

impl ServerState {
    pub fn new(config: ServerConfig) -> Result<Self, StartupError> {
        let root_dir = config
            .root_dir
            .canonicalize()
            .map_err(|source| StartupError::Resolve {
                path: config.root_dir.clone(),
                source,
            })?;
        if !root_dir.is_dir() {
            return Err(StartupError::NotADirectory(root_dir));
        }

        let static_dir = root_dir.join(STATIC_DIR_NAME);
        let highlight = if config.highlight && !static_dir.is_dir() {
            warn!(
                "Static directory '{}' not found. Syntax highlighting is disabled.",
                static_dir.display()
            );
            false
        } else {
            config.highlight
        };

        info!("Serving files from: {}", root_dir.display());
        Ok(Self {
            root_dir,
            static_dir,
            show_hidden: config.show_hidden,
            highlight,
            sizes: SizeCache::new(),
            archives: ArchiveBuilder::new(config.archive_reuse),
        })
    }

    pub fn shared(config: ServerConfig) -> Result<SharedState, StartupError> {
        Self::new(config).map(Arc::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn highlight_needs_static_dir() {
        let dir = tempdir().unwrap();
        let state = ServerState::new(ServerConfig::new(dir.path())).unwrap();
        assert!(!state.highlight);

        std::fs::create_dir(dir.path().join(STATIC_DIR_NAME)).unwrap();
        let state = ServerState::new(ServerConfig::new(dir.path())).unwrap();
        assert!(state.highlight);
    }

    #[test]
    fn rejects_missing_and_non_directory_roots() {
        let dir = tempdir().unwrap();
        let err = ServerState::new(ServerConfig::new(dir.path().join("nope"))).err();
        assert!(matches!(err, Some(StartupError::Resolve { .. })));

        let file = dir.path().join("file.txt");
        std::fs::write(&file, b"x").unwrap();
        let err = ServerState::new(ServerConfig::new(&file)).err();
        assert!(matches!(err, Some(StartupError::NotADirectory(_))));
    }
}
