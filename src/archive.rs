//! On-demand zip archives of shared directories.
//!
//! Builds are serialized process-wide by a single gate. An archive is first
//! written to a hidden temporary file next to its target and then renamed
//! into place, so readers see either no archive or a complete one.

use std::{
    fs::File,
    io,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

use crate::config::ArchiveReuse;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive target {0} has no parent directory")]
    NoParent(PathBuf),
    #[error("walking source directory: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("writing zip: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("moving archive into place: {0}")]
    Persist(#[from] tempfile::PersistError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// An archive already at the target was kept.
    Reused,
    Built,
}

pub struct ArchiveBuilder {
    gate: Mutex<()>,
    reuse: ArchiveReuse,
}

impl ArchiveBuilder {
    pub fn new(reuse: ArchiveReuse) -> Self {
        Self {
            gate: Mutex::new(()),
            reuse,
        }
    }

    pub fn reuse(&self) -> ArchiveReuse {
        self.reuse
    }

    /// Ensures a complete archive of `source` exists at `target`.
    ///
    /// Blocks while another build is running. On failure nothing is left at
    /// `target` and the temporary file is removed.
    pub fn build(&self, source: &Path, target: &Path) -> Result<BuildOutcome, ArchiveError> {
        // A panicked build only leaves a temp file behind, so a poisoned gate is still usable
        let _guard = self.gate.lock().unwrap_or_else(PoisonError::into_inner);

        // Re-checked under the gate: a build that was waiting finds the archive
        // the previous holder just wrote.
        if target.is_file() {
            if self.reuse == ArchiveReuse::Always || is_fresh(source, target) {
                info!("ZIP file {} already exists.", target.display());
                return Ok(BuildOutcome::Reused);
            }
            info!(
                "ZIP file {} is older than {}, rebuilding.",
                target.display(),
                source.display()
            );
        }

        info!(
            "Creating ZIP file {} for directory {}",
            target.display(),
            source.display()
        );
        let parent = target
            .parent()
            .ok_or_else(|| ArchiveError::NoParent(target.to_path_buf()))?;
        // Same directory as the target so persist is a rename, not a copy.
        // Dropping the temp file on any early return deletes it.
        let mut tmp = NamedTempFile::new_in(parent)?;
        write_zip(source, tmp.as_file_mut())?;
        tmp.persist(target)?;

        info!("Successfully created ZIP file {}", target.display());
        Ok(BuildOutcome::Built)
    }
}

fn is_fresh(source: &Path, target: &Path) -> bool {
    let mtime = |p: &Path| p.metadata().and_then(|m| m.modified()).ok();
    match (mtime(source), mtime(target)) {
        (Some(src), Some(zip)) => zip >= src,
        _ => true,
    }
}

fn write_zip(source: &Path, out: &mut File) -> Result<(), ArchiveError> {
    let mut zip = ZipWriter::new(out);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in WalkDir::new(source).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = archive_name(source, entry.path());
        let large = entry.metadata()?.len() >= u64::from(u32::MAX);
        debug!("Adding {} to archive", name);

        zip.start_file(name, options.large_file(large))?;
        let mut file = File::open(entry.path())?;
        io::copy(&mut file, &mut zip)?;
    }
    zip.finish()?;
    Ok(())
}

/// Path of `file` relative to `source`, '/'-separated as zip requires.
fn archive_name(source: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(source).unwrap_or(file);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        fs,
        io::Read,
        sync::Arc,
        thread,
        time::{Duration, SystemTime},
    };
    use tempfile::tempdir;
    use zip::ZipArchive;

    fn sample_tree(root: &Path) -> PathBuf {
        let src = root.join("photos");
        fs::create_dir_all(src.join("2023/summer")).unwrap();
        fs::create_dir_all(src.join("empty")).unwrap();
        fs::write(src.join("readme.txt"), b"top level").unwrap();
        fs::write(src.join("2023/summer/beach.jpg"), vec![7u8; 4096]).unwrap();
        src
    }

    fn entry_names(zip_path: &Path) -> Vec<String> {
        let mut archive = ZipArchive::new(File::open(zip_path).unwrap()).unwrap();
        let mut names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        names.sort();
        names
    }

    fn leftover_temp_files(dir: &Path) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with(".tmp"))
            .count()
    }

    #[test]
    fn archives_regular_files_with_relative_paths() {
        let root = tempdir().unwrap();
        let src = sample_tree(root.path());
        let target = root.path().join("photos.zip");

        let builder = ArchiveBuilder::new(ArchiveReuse::Always);
        assert_eq!(builder.build(&src, &target).unwrap(), BuildOutcome::Built);

        assert_eq!(
            entry_names(&target),
            vec!["2023/summer/beach.jpg", "readme.txt"]
        );

        let mut archive = ZipArchive::new(File::open(&target).unwrap()).unwrap();
        let mut contents = String::new();
        archive
            .by_name("readme.txt")
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "top level");
        assert_eq!(leftover_temp_files(root.path()), 0);
    }

    #[test]
    fn existing_archive_is_reused() {
        let root = tempdir().unwrap();
        let src = sample_tree(root.path());
        let target = root.path().join("photos.zip");
        let builder = ArchiveBuilder::new(ArchiveReuse::Always);
        builder.build(&src, &target).unwrap();

        fs::write(src.join("new.txt"), b"added later").unwrap();
        assert_eq!(builder.build(&src, &target).unwrap(), BuildOutcome::Reused);
        assert!(!entry_names(&target).contains(&"new.txt".to_string()));
    }

    #[test]
    fn stale_archive_is_rebuilt_when_configured() {
        let root = tempdir().unwrap();
        let src = sample_tree(root.path());
        let target = root.path().join("photos.zip");
        let builder = ArchiveBuilder::new(ArchiveReuse::WhileFresh);
        builder.build(&src, &target).unwrap();

        fs::write(src.join("new.txt"), b"added later").unwrap();
        let later = SystemTime::now() + Duration::from_secs(5);
        File::open(&src).unwrap().set_modified(later).unwrap();

        assert_eq!(builder.build(&src, &target).unwrap(), BuildOutcome::Built);
        assert!(entry_names(&target).contains(&"new.txt".to_string()));
    }

    #[test]
    fn concurrent_builds_produce_one_complete_archive() {
        let root = tempdir().unwrap();
        let src = sample_tree(root.path());
        let target = root.path().join("photos.zip");
        let builder = Arc::new(ArchiveBuilder::new(ArchiveReuse::Always));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let builder = Arc::clone(&builder);
                let (src, target) = (src.clone(), target.clone());
                thread::spawn(move || builder.build(&src, &target).unwrap())
            })
            .collect();
        let outcomes: Vec<BuildOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let built = outcomes.iter().filter(|o| **o == BuildOutcome::Built).count();
        assert_eq!(built, 1);
        assert_eq!(entry_names(&target).len(), 2);
        assert_eq!(leftover_temp_files(root.path()), 0);
    }

    #[test]
    fn failed_build_leaves_nothing_behind() {
        let root = tempdir().unwrap();
        let target = root.path().join("missing.zip");
        let builder = ArchiveBuilder::new(ArchiveReuse::Always);

        let result = builder.build(&root.path().join("missing"), &target);
        assert!(result.is_err());
        assert!(!target.exists());
        assert_eq!(leftover_temp_files(root.path()), 0);
    }
}
