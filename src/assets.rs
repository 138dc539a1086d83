//! Copies images referenced by a document into the test's output directory.
//!
//! A copy is made only when the destination is missing or older than the source, and the copy
//! takes the source's modification time. Materializing the same inputs twice therefore copies
//! nothing the second time. The result of every run is recorded in the per test image manifest,
//! which the index later checks for per-asset staleness.
use filetime::{set_file_mtime, FileTime};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::{copy, create_dir_all, metadata, read_to_string, File},
    path::{Path, PathBuf},
    time::SystemTime,
};

use crate::{
    codec::{context::JobLog, question::ImageRef},
    error::MantraError,
    index::{entry::MANIFEST_NAME, store::write_atomic},
};

/// One materialized (or skipped) image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub src: PathBuf,
    pub dst: PathBuf,
    /// Modification time of the copy right after materializing. None when the image was
    /// skipped.
    pub dst_mtime: Option<SystemTime>,
}

impl ManifestEntry {
    /// True when the source changed after the copy was made, or the copy disappeared while the
    /// source is still there.
    pub fn is_stale(&self) -> bool {
        let Some(src_mtime) = metadata(&self.src).and_then(|m| m.modified()).ok() else {
            return false;
        };
        match (self.dst_mtime, metadata(&self.dst).ok()) {
            (Some(recorded), Some(_)) => src_mtime > recorded,
            _ => true,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MaterializeReport {
    pub copied: usize,
    pub kept: usize,
    pub skipped: usize,
    pub manifest: Vec<ManifestEntry>,
}

fn mtime(path: &Path) -> Option<SystemTime> {
    metadata(path).and_then(|m| m.modified()).ok()
}

fn copy_image(image: &ImageRef) -> Result<bool, MantraError> {
    let src_meta = metadata(&image.src)?;
    // A readable source is required, not just an existing one
    File::open(&image.src)?;
    let src_mtime = src_meta.modified()?;
    if let Some(dst_mtime) = mtime(&image.dst) {
        if src_mtime <= dst_mtime {
            return Ok(false);
        }
    }
    if let Some(parent) = image.dst.parent() {
        create_dir_all(parent)?;
    }
    copy(&image.src, &image.dst)?;
    set_file_mtime(&image.dst, FileTime::from_last_modification_time(&src_meta))?;
    Ok(true)
}

/// Copy every image whose destination is missing or older than its source. Failures are
/// logged and skipped.
#[tracing::instrument(skip_all)]
pub fn materialize(images: &[ImageRef], log: &JobLog) -> MaterializeReport {
    let mut report = MaterializeReport::default();
    let mut seen: BTreeMap<&Path, &Path> = BTreeMap::new();
    for image in images {
        if let Some(first) = seen.get(image.dst.as_path()) {
            if *first != image.src.as_path() {
                log.warn(format!(
                    "Image {:?} ignored: {:?} is already taken by {:?}",
                    image.src, image.dst, first
                ));
            }
            continue;
        }
        seen.insert(image.dst.as_path(), image.src.as_path());
        match copy_image(image) {
            Ok(true) => {
                log.debug(format!("Copied image {:?}", image.src));
                report.copied += 1;
            }
            Ok(false) => report.kept += 1,
            Err(e) => {
                log.warn(format!("Skipping image {:?}: {e}", image.src));
                report.skipped += 1;
            }
        }
        report.manifest.push(ManifestEntry {
            src: image.src.clone(),
            dst: image.dst.clone(),
            dst_mtime: mtime(&image.dst),
        });
    }
    log.info(format!(
        "Images: {} copied, {} current, {} skipped",
        report.copied, report.kept, report.skipped
    ));
    report
}

pub fn write_manifest(dst_dir: &Path, manifest: &[ManifestEntry]) -> Result<(), MantraError> {
    let json = serde_json::to_string_pretty(manifest)?;
    write_atomic(&dst_dir.join(MANIFEST_NAME), json.as_bytes())
}

/// The manifest of `dst_dir`. Missing or unreadable manifests read as empty.
pub fn read_manifest(dst_dir: &Path) -> Vec<ManifestEntry> {
    let path = dst_dir.join(MANIFEST_NAME);
    let Ok(content) = read_to_string(&path) else {
        return Vec::new();
    };
    serde_json::from_str(&content).unwrap_or_else(|e| {
        tracing::warn!("ignoring unreadable image manifest {path:?}: {e}");
        Vec::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn image(dir: &Path, name: &str) -> ImageRef {
        ImageRef {
            src: dir.join("src/img").join(name),
            dst: dir.join("dst/T/img").join(name),
        }
    }

    fn write_src(img: &ImageRef, content: &str) {
        std::fs::create_dir_all(img.src.parent().unwrap()).unwrap();
        std::fs::write(&img.src, content).unwrap();
    }

    #[test]
    fn second_run_copies_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let img = image(dir.path(), "a.png");
        write_src(&img, "png");
        let log = JobLog::discard("T");

        let first = materialize(std::slice::from_ref(&img), &log);
        assert_eq!(first.copied, 1);
        assert_eq!(std::fs::read_to_string(&img.dst).unwrap(), "png");
        assert_eq!(mtime(&img.dst), mtime(&img.src));

        let second = materialize(std::slice::from_ref(&img), &log);
        assert_eq!(second.copied, 0);
        assert_eq!(second.kept, 1);
        assert!(!second.manifest[0].is_stale());
    }

    #[test]
    fn newer_source_is_copied_again() {
        let dir = tempfile::tempdir().unwrap();
        let img = image(dir.path(), "a.png");
        write_src(&img, "v1");
        let log = JobLog::discard("T");
        let first = materialize(std::slice::from_ref(&img), &log);

        std::fs::write(&img.src, "v2").unwrap();
        let later = FileTime::from_system_time(SystemTime::now() + Duration::from_secs(10));
        set_file_mtime(&img.src, later).unwrap();
        assert!(first.manifest[0].is_stale());

        let second = materialize(std::slice::from_ref(&img), &log);
        assert_eq!(second.copied, 1);
        assert_eq!(std::fs::read_to_string(&img.dst).unwrap(), "v2");
    }

    #[test]
    fn missing_source_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let present = image(dir.path(), "a.png");
        let missing = image(dir.path(), "gone.png");
        write_src(&present, "png");
        let report = materialize(&[missing.clone(), present.clone()], &JobLog::discard("T"));
        assert_eq!(report.skipped, 1);
        assert_eq!(report.copied, 1);
        assert_eq!(report.manifest.len(), 2);
        assert_eq!(report.manifest[0].dst_mtime, None);
        assert!(!report.manifest[0].is_stale());
    }

    #[test]
    fn conflicting_destination_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let first = image(dir.path(), "a.png");
        let second = ImageRef {
            src: dir.path().join("src/other/a.png"),
            dst: first.dst.clone(),
        };
        write_src(&first, "first");
        write_src(&second, "second");
        let log_path = dir.path().join("mtr.log");
        let log = JobLog::append("T", &log_path).unwrap();

        let report = materialize(&[first.clone(), first.clone(), second], &log);
        log.flush();
        assert_eq!(report.manifest.len(), 1);
        assert_eq!(std::fs::read_to_string(&first.dst).unwrap(), "first");
        let logged = std::fs::read_to_string(&log_path).unwrap();
        assert_eq!(logged.matches("already taken").count(), 1);
        assert!(logged.contains("WARNING"));
    }

    #[test]
    fn manifest_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let img = image(dir.path(), "a.png");
        write_src(&img, "png");
        let report = materialize(std::slice::from_ref(&img), &JobLog::discard("T"));
        write_manifest(dir.path(), &report.manifest).unwrap();
        assert_eq!(read_manifest(dir.path()), report.manifest);
        assert!(read_manifest(&dir.path().join("nowhere")).is_empty());
    }

    #[test]
    fn deleted_copy_is_stale() {
        let dir = tempfile::tempdir().unwrap();
        let img = image(dir.path(), "a.png");
        write_src(&img, "png");
        let report = materialize(std::slice::from_ref(&img), &JobLog::discard("T"));
        std::fs::remove_file(&img.dst).unwrap();
        assert!(report.manifest[0].is_stale());
    }
}
