//! Candidate class scanning.
//!
//! # Responsibility
//! - Stream every class entry of every artifact through the metadata
//!   inspector and collect classes carrying a marker.
//! - Complete the match set with an inheritance-closure pass once every
//!   class has been seen.
//!
//! # Invariants
//! - Candidates are reported in discovery order.
//! - The first artifact declaring a class name wins.
//! - A bad entry or artifact is logged and skipped; scanning continues.
//! - Directory walks never follow symlinks.

use crate::config::RuntimeConfig;
use crate::extension::marker::MarkerSet;
use crate::scan::artifact::ArtifactLocation;
use crate::scan::inspector::{ClassMetadata, InspectError, MetadataInspector};
use log::{debug, error, info};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use walkdir::WalkDir;

/// Result of one scan.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanReport {
    /// Matching class names, in discovery order.
    pub candidates: Vec<String>,
    /// Effective markers of every candidate.
    pub markers: HashMap<String, MarkerSet>,
    /// Class entries successfully inspected.
    pub inspected: usize,
    /// Class entries skipped because inspection failed.
    pub skipped: usize,
    /// Candidates found only through the inheritance-closure pass.
    pub implied: usize,
}

#[derive(Debug, thiserror::Error)]
enum ArtifactError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

pub struct CandidateScanner {
    inspector: Arc<dyn MetadataInspector>,
    class_suffix: String,
}

impl CandidateScanner {
    pub fn new(inspector: Arc<dyn MetadataInspector>, class_suffix: impl Into<String>) -> Self {
        Self {
            inspector,
            class_suffix: class_suffix.into(),
        }
    }

    pub fn from_config(inspector: Arc<dyn MetadataInspector>, config: &RuntimeConfig) -> Self {
        Self::new(inspector, config.class_suffix.clone())
    }

    pub fn scan(&self, artifacts: &[ArtifactLocation]) -> ScanReport {
        let mut pass = StreamingPass::default();
        for artifact in artifacts {
            if artifact.is_directory() {
                self.scan_directory(artifact.path(), &mut pass);
            } else if let Err(err) = self.scan_archive(artifact.path(), &mut pass) {
                error!(
                    "event=artifact_scan module=scanner status=error artifact={} error={err}",
                    artifact.path().display()
                );
            }
        }
        let report = pass.close();
        info!(
            "event=candidate_scan module=scanner status=ok artifacts={} inspected={} skipped={} candidates={} implied={}",
            artifacts.len(),
            report.inspected,
            report.skipped,
            report.candidates.len(),
            report.implied
        );
        report
    }

    fn scan_archive(&self, path: &Path, pass: &mut StreamingPass) -> Result<(), ArtifactError> {
        let mut archive = zip::ZipArchive::new(File::open(path)?)?;
        for index in 0..archive.len() {
            let mut entry = match archive.by_index(index) {
                Ok(entry) => entry,
                Err(err) => {
                    error!(
                        "event=entry_scan module=scanner status=error artifact={} index={index} error={err}",
                        path.display()
                    );
                    continue;
                }
            };
            if entry.is_dir() || !entry.name().ends_with(&self.class_suffix) {
                continue;
            }
            let entry_name = entry.name().to_string();
            self.inspect_entry(&entry_name, &mut entry, pass);
        }
        Ok(())
    }

    /// Walks `root` depth first in name order without following symlinks.
    fn scan_directory(&self, root: &Path, pass: &mut StreamingPass) {
        let walker = WalkDir::new(root).follow_links(false).sort_by_file_name();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err.path().unwrap_or(root).display().to_string();
                    error!(
                        "event=entry_scan module=scanner status=error artifact={} path={path} error={err}",
                        root.display()
                    );
                    continue;
                }
            };
            let is_class = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.ends_with(&self.class_suffix));
            if !entry.file_type().is_file() || !is_class {
                continue;
            }
            let entry_name = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .display()
                .to_string();
            match File::open(entry.path()) {
                Ok(mut file) => self.inspect_entry(&entry_name, &mut file, pass),
                Err(err) => {
                    pass.skipped += 1;
                    error!(
                        "event=entry_scan module=scanner status=error entry={entry_name} error={err}"
                    );
                }
            }
        }
    }

    fn inspect_entry(&self, entry_name: &str, input: &mut dyn Read, pass: &mut StreamingPass) {
        match self.inspector.inspect(input) {
            Ok(metadata) => pass.record(metadata),
            Err(InspectError::Unresolved { class, symbol }) => {
                pass.skipped += 1;
                debug!(
                    "event=entry_scan module=scanner status=skip entry={entry_name} class={class} reason=unresolved symbol={symbol}"
                );
            }
            Err(err) => {
                pass.skipped += 1;
                error!("event=entry_scan module=scanner status=error entry={entry_name} error={err}");
            }
        }
    }
}

#[derive(Default)]
struct StreamingPass {
    classes: Vec<ClassMetadata>,
    markers: Vec<MarkerSet>,
    index: HashMap<String, usize>,
    inspected: usize,
    skipped: usize,
}

impl StreamingPass {
    fn record(&mut self, metadata: ClassMetadata) {
        self.inspected += 1;
        if self.index.contains_key(&metadata.name) {
            debug!(
                "event=entry_scan module=scanner status=skip class={} reason=shadowed",
                metadata.name
            );
            return;
        }
        self.index.insert(metadata.name.clone(), self.classes.len());
        self.markers.push(metadata.declared_markers());
        self.classes.push(metadata);
    }

    /// Propagates interface markers from supertypes to a fixpoint.
    fn close(mut self) -> ScanReport {
        let declared = self.markers.clone();
        loop {
            let mut changed = false;
            for position in 0..self.classes.len() {
                let inherited = self.classes[position]
                    .supertypes()
                    .filter_map(|name| self.index.get(name))
                    .fold(MarkerSet::empty(), |set, parent| {
                        set.union(self.markers[*parent].interfaces())
                    });
                let effective = self.markers[position].union(inherited);
                if effective != self.markers[position] {
                    self.markers[position] = effective;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        let mut report = ScanReport {
            inspected: self.inspected,
            skipped: self.skipped,
            ..ScanReport::default()
        };
        for (position, class) in self.classes.into_iter().enumerate() {
            let markers = self.markers[position];
            if markers.is_empty() {
                continue;
            }
            if declared[position].is_empty() {
                report.implied += 1;
            }
            report.markers.insert(class.name.clone(), markers);
            report.candidates.push(class.name);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::CandidateScanner;
    use crate::extension::marker::{MarkerKind, MarkerSet};
    use crate::scan::artifact::{ArtifactEnumerator, UrlLoader};
    use crate::scan::inspector::JsonClassInspector;
    use serde_json::json;
    use std::fs;
    use std::sync::Arc;

    fn write_class(root: &std::path::Path, relative: &str, record: serde_json::Value) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().expect("parent dir")).expect("create dirs");
        fs::write(path, serde_json::to_vec(&record).expect("serialize")).expect("write class");
    }

    #[test]
    fn closure_pass_finds_classes_declared_before_their_supertype() {
        let dir = tempfile::tempdir().expect("temp dir");
        let classes = dir.path().join("classes");
        // `a/Impl` is visited before `z/Base`, which carries the marker.
        write_class(
            &classes,
            "a/Impl.class",
            json!({"name": "a.Impl", "superclass": "z.Base"}),
        );
        write_class(
            &classes,
            "z/Base.class",
            json!({
                "name": "z.Base",
                "abstract": true,
                "interfaces": ["filterkit.ExtensionModule"]
            }),
        );
        write_class(
            &classes,
            "m/Annotated.class",
            json!({"name": "m.Annotated", "annotations": ["filterkit.ExtensionContext"]}),
        );
        write_class(
            &classes,
            "n/Child.class",
            json!({"name": "n.Child", "superclass": "m.Annotated"}),
        );

        let loader = UrlLoader::from_paths("app", &[&classes]);
        let artifacts = ArtifactEnumerator::new([".jar"]).enumerate(&loader);
        let report = CandidateScanner::new(Arc::new(JsonClassInspector), ".class").scan(&artifacts);

        assert_eq!(report.candidates, vec!["a.Impl", "m.Annotated", "z.Base"]);
        assert_eq!(report.implied, 1);
        assert_eq!(report.inspected, 4);
        assert_eq!(
            report.markers.get("a.Impl"),
            Some(&MarkerSet::of(&[MarkerKind::Module]))
        );
    }

    #[cfg(unix)]
    #[test]
    fn directory_walk_survives_symlink_loops_and_locked_subdirectories() {
        use std::os::unix::fs::{symlink, PermissionsExt};

        let dir = tempfile::tempdir().expect("temp dir");
        let classes = dir.path().join("classes");
        write_class(
            &classes,
            "pkg/A.class",
            json!({"name": "pkg.A", "annotations": ["filterkit.ExtensionContext"]}),
        );
        write_class(
            &classes,
            "pkg/locked/B.class",
            json!({"name": "pkg.locked.B"}),
        );
        symlink(&classes, classes.join("pkg/loop")).expect("symlink loop");
        let locked = classes.join("pkg/locked");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).expect("lock dir");

        let loader = UrlLoader::from_paths("app", &[&classes]);
        let artifacts = ArtifactEnumerator::new([".jar"]).enumerate(&loader);
        let report = CandidateScanner::new(Arc::new(JsonClassInspector), ".class").scan(&artifacts);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).expect("unlock dir");

        assert_eq!(report.candidates, vec!["pkg.A"]);
        assert_eq!(report.skipped, 0);
    }
}
