//! Code artifact enumeration over a loader chain.
//!
//! # Responsibility
//! - Walk a loader and its ancestors and collect the local artifacts they
//!   expose.
//!
//! # Invariants
//! - Ancestors are enumerated before descendants.
//! - Every artifact appears once, identified by canonical path.
//! - One bad entry never aborts enumeration.

use crate::config::RuntimeConfig;
use log::{debug, error};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

/// Node of a code-loader hierarchy.
pub trait CodeLoader: Send + Sync {
    fn name(&self) -> &str;
    fn urls(&self) -> Vec<Url>;
    fn parent(&self) -> Option<Arc<dyn CodeLoader>>;
}

/// Loader over a fixed URL list.
#[derive(Clone)]
pub struct UrlLoader {
    name: String,
    urls: Vec<Url>,
    parent: Option<Arc<dyn CodeLoader>>,
}

impl UrlLoader {
    pub fn new(name: impl Into<String>, urls: Vec<Url>) -> Self {
        Self {
            name: name.into(),
            urls,
            parent: None,
        }
    }

    /// Loader over local paths; paths that cannot become file URLs are
    /// logged and dropped.
    pub fn from_paths<P: AsRef<Path>>(name: impl Into<String>, paths: &[P]) -> Self {
        let name = name.into();
        let urls = paths
            .iter()
            .filter_map(|path| {
                let path = path.as_ref();
                let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
                match Url::from_file_path(&absolute) {
                    Ok(url) => Some(url),
                    Err(()) => {
                        error!(
                            "event=loader_url module=artifact status=error loader={name} path={} error_code=not_a_file_url",
                            path.display()
                        );
                        None
                    }
                }
            })
            .collect();
        Self::new(name, urls)
    }

    pub fn with_parent(mut self, parent: Arc<dyn CodeLoader>) -> Self {
        self.parent = Some(parent);
        self
    }
}

impl CodeLoader for UrlLoader {
    fn name(&self) -> &str {
        &self.name
    }

    fn urls(&self) -> Vec<Url> {
        self.urls.clone()
    }

    fn parent(&self) -> Option<Arc<dyn CodeLoader>> {
        self.parent.clone()
    }
}

/// Archive file or expanded directory, by canonical path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ArtifactLocation {
    path: PathBuf,
}

impl ArtifactLocation {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_directory(&self) -> bool {
        self.path.is_dir()
    }
}

pub struct ArtifactEnumerator {
    extensions: Vec<String>,
}

impl ArtifactEnumerator {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            extensions: extensions.into_iter().map(Into::into).collect(),
        }
    }

    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self::new(config.archive_extensions.iter().cloned())
    }

    /// Enumerates artifacts of `loader` and its ancestors, parent first.
    pub fn enumerate(&self, loader: &dyn CodeLoader) -> Vec<ArtifactLocation> {
        let mut levels = vec![(loader.name().to_string(), loader.urls())];
        let mut next = loader.parent();
        while let Some(current) = next {
            levels.push((current.name().to_string(), current.urls()));
            next = current.parent();
        }

        let mut seen = BTreeSet::new();
        let mut artifacts = Vec::new();
        for (name, urls) in levels.into_iter().rev() {
            for url in urls {
                let Some(path) = self.accept(&name, &url) else {
                    continue;
                };
                if seen.insert(path.clone()) {
                    artifacts.push(ArtifactLocation { path });
                } else {
                    debug!(
                        "event=artifact_enumerate module=artifact status=skip loader={name} path={} reason=duplicate",
                        path.display()
                    );
                }
            }
        }
        debug!(
            "event=artifact_enumerate module=artifact status=ok artifacts={}",
            artifacts.len()
        );
        artifacts
    }

    fn accept(&self, loader: &str, url: &Url) -> Option<PathBuf> {
        if url.scheme() != "file" {
            debug!("event=artifact_enumerate module=artifact status=skip loader={loader} url={url} reason=not_local");
            return None;
        }
        let path = match url.to_file_path() {
            Ok(path) => path,
            Err(()) => {
                error!(
                    "event=artifact_enumerate module=artifact status=error loader={loader} url={url} error_code=invalid_file_url"
                );
                return None;
            }
        };
        let canonical = match path.canonicalize() {
            Ok(canonical) => canonical,
            Err(err) => {
                debug!(
                    "event=artifact_enumerate module=artifact status=skip loader={loader} path={} reason=unreachable error={err}",
                    path.display()
                );
                return None;
            }
        };
        if canonical.is_dir() || (canonical.is_file() && self.is_archive(&canonical)) {
            Some(canonical)
        } else {
            debug!(
                "event=artifact_enumerate module=artifact status=skip loader={loader} path={} reason=not_an_archive",
                canonical.display()
            );
            None
        }
    }

    fn is_archive(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            return false;
        };
        self.extensions
            .iter()
            .any(|extension| name.len() > extension.len() && name.ends_with(extension.as_str()))
    }
}
