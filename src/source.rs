//! Raw source files that override compiled assets during development.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{ContentError, Result};
use crate::payload::{AssetKind, Payload};

pub(crate) type LoadFromPath = dyn Fn(&Path) -> anyhow::Result<Payload> + Send + Sync;

#[derive(Clone)]
pub(crate) struct SourceLoader {
    kind: AssetKind,
    extensions: Vec<String>,
    load: Arc<LoadFromPath>,
}

impl SourceLoader {
    pub(crate) fn new<I, S>(kind: AssetKind, extensions: I, load: Arc<LoadFromPath>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extensions = extensions
            .into_iter()
            .map(|ext| normalize_extension(ext.as_ref()))
            .filter(|ext| ext.len() > 1)
            .collect();
        Self {
            kind,
            extensions,
            load,
        }
    }

    pub(crate) fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Looks for `<dir>/<base><ext>` next to the requested asset.
    ///
    /// Relative names resolve against `root`. The first extension, in
    /// registration order, with a matching file wins.
    pub(crate) fn find(&self, root: &Path, name: &str) -> Option<PathBuf> {
        let requested = Path::new(name);
        let base = requested.file_name()?.to_string_lossy().to_lowercase();
        let parent = requested.parent().filter(|p| !p.as_os_str().is_empty());
        let dir = match parent {
            Some(parent) if requested.is_absolute() => parent.to_path_buf(),
            Some(parent) => root.join(parent),
            None => root.to_path_buf(),
        };

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) => {
                log::debug!("no source directory {}: {err}", dir.display());
                return None;
            }
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    log::warn!("unable to list {}: {err}", dir.display());
                    continue;
                }
            };
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                files.push((entry.file_name().to_string_lossy().to_lowercase(), entry.path()));
            }
        }

        self.extensions.iter().find_map(|ext| {
            let wanted = format!("{base}{ext}");
            files
                .iter()
                .find(|(file, _)| *file == wanted)
                .map(|(_, path)| path.clone())
        })
    }

    pub(crate) fn load(&self, path: &Path) -> Result<Payload> {
        log::debug!("loading {} from source {}", self.kind.short_name(), path.display());
        (self.load)(path).map_err(|source| ContentError::SourceLoad {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().trim_start_matches('.').to_lowercase();
    format!(".{ext}")
}

/// Source loaders keyed by the type they produce.
#[derive(Default)]
pub(crate) struct SourceLoaders {
    loaders: HashMap<AssetKind, SourceLoader>,
}

impl SourceLoaders {
    /// Registers `loader`, replacing any previous loader for the same type.
    pub(crate) fn register(&mut self, loader: SourceLoader) {
        if self.loaders.insert(loader.kind, loader).is_some() {
            log::debug!("replaced source loader");
        }
    }

    pub(crate) fn get(&self, kind: AssetKind) -> Option<SourceLoader> {
        self.loaders.get(&kind).cloned()
    }
}
