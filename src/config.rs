use std::fs;
use std::path::{Path, PathBuf};

use roxmltree::{Document, Node};
use serde::{Deserialize, Serialize};

use crate::error::{ContentError, Result};

/// Settings for a [`ContentTracker`](crate::ContentTracker).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Directory relative asset names resolve against.
    pub root_directory: PathBuf,
    /// Whether source file overrides are enabled at startup.
    pub use_source_assets: bool,
    /// Name given to the background loader thread.
    pub worker_name: String,
    pub preload: Vec<PreloadEntry>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            root_directory: PathBuf::from("."),
            use_source_assets: false,
            worker_name: default_worker_name(),
            preload: Vec::new(),
        }
    }
}

/// Asset listed for loading at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreloadEntry {
    pub name: String,
    /// Kind label understood by the host application.
    pub kind: String,
}

impl TrackerConfig {
    /// Parses a `<content>` document.
    pub fn from_xml(xml: &str) -> Result<Self> {
        let document = Document::parse(xml)
            .map_err(|err| ContentError::Config(format!("invalid content XML: {err}")))?;
        let root = document.root_element();
        if !root.has_tag_name("content") {
            return Err(ContentError::Config(format!(
                "expected <content>, found <{}>",
                root.tag_name().name()
            )));
        }

        let mut config = Self::default();
        if let Some(directory) = optional_attr(&root, "root") {
            config.root_directory = PathBuf::from(directory);
        }
        config.use_source_assets =
            parse_bool(optional_attr(&root, "source-assets"), config.use_source_assets)?;
        if let Some(worker) = optional_attr(&root, "worker") {
            config.worker_name = worker;
        }

        for node in root.children().filter(|n| n.has_tag_name("preload")) {
            config.preload.push(PreloadEntry {
                name: required_attr(&node, "name")?,
                kind: optional_attr(&node, "kind").unwrap_or_else(|| "text".to_string()),
            });
        }

        Ok(config)
    }

    /// Reads a configuration file. A relative `root` is taken relative to
    /// the file's directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let xml = fs::read_to_string(path)?;
        let mut config = Self::from_xml(&xml)?;
        if config.root_directory.is_relative() {
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            config.root_directory = base.join(&config.root_directory);
        }
        log::debug!("loaded content configuration from {}", path.display());
        Ok(config)
    }
}

fn default_worker_name() -> String {
    "content-loader".to_string()
}

fn required_attr(node: &Node<'_, '_>, name: &str) -> Result<String> {
    optional_attr(node, name).ok_or_else(|| {
        ContentError::Config(format!(
            "<{}> is missing the {name} attribute",
            node.tag_name().name()
        ))
    })
}

fn optional_attr(node: &Node<'_, '_>, name: &str) -> Option<String> {
    node.attribute(name)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| value.to_string())
}

fn parse_bool(value: Option<String>, default: bool) -> Result<bool> {
    match value.as_deref() {
        None => Ok(default),
        Some("true" | "yes" | "1") => Ok(true),
        Some("false" | "no" | "0") => Ok(false),
        Some(other) => Err(ContentError::Config(format!(
            "expected a boolean, found {other:?}"
        ))),
    }
}
