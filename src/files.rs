//! Files to copy into a calculation's run directory
//!
//! Either a whole source directory, or a mapping from source directories to
//! glob patterns selecting files relative to each source. A `*` pattern
//! matches any relative path, including ones in subdirectories.
//!
//! Gzip-compressed files (`*.gz`) are decompressed on the way in and land
//! without the suffix.

use flate2::read::GzDecoder;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Errors for copying input files
#[derive(Debug, thiserror::Error)]
pub enum CopyFilesError {
    #[error("source directory does not exist: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("cannot decompress {}: {source}", .path.display())]
    Decompress { path: PathBuf, source: io::Error },

    #[error("Glob pattern error: {0}")]
    Glob(#[from] globset::Error),

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Filename selection for one source directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Filenames {
    One(String),
    Many(Vec<String>),
}

impl Filenames {
    pub fn all() -> Self {
        Filenames::One("*".to_string())
    }

    pub fn patterns(&self) -> Vec<&str> {
        match self {
            Filenames::One(p) => vec![p.as_str()],
            Filenames::Many(ps) => ps.iter().map(String::as_str).collect(),
        }
    }
}

/// What to copy into the run directory before a calculation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CopyFiles {
    /// Copy everything under this directory
    Directory(PathBuf),
    /// Copy the selected files from each directory
    Selection(BTreeMap<PathBuf, Filenames>),
}

impl CopyFiles {
    /// Normalize to (source, selection) pairs
    pub fn sources(&self) -> Vec<(&Path, Filenames)> {
        match self {
            CopyFiles::Directory(dir) => vec![(dir.as_path(), Filenames::all())],
            CopyFiles::Selection(map) => map
                .iter()
                .map(|(dir, names)| (dir.as_path(), names.clone()))
                .collect(),
        }
    }
}

fn build_matcher(patterns: &[&str]) -> Result<GlobSet, CopyFilesError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        if !pattern.is_empty() {
            builder.add(Glob::new(pattern)?);
        }
    }
    Ok(builder.build()?)
}

fn is_gzip(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "gz")
}

/// Copy one file to `dest/rel_path`, decompressing gzip files.
/// Returns the path written, relative to `dest`.
fn place_file(source: &Path, rel_path: &Path, dest: &Path) -> Result<PathBuf, CopyFilesError> {
    let rel_target = if is_gzip(rel_path) {
        rel_path.with_extension("")
    } else {
        rel_path.to_path_buf()
    };
    let target = dest.join(&rel_target);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }

    if is_gzip(rel_path) {
        let mut decoder = GzDecoder::new(File::open(source)?);
        let mut out = File::create(&target)?;
        io::copy(&mut decoder, &mut out).map_err(|source_err| CopyFilesError::Decompress {
            path: source.to_path_buf(),
            source: source_err,
        })?;
    } else {
        fs::copy(source, &target)?;
    }
    Ok(rel_target)
}

/// Copy the selected files into `dest`, preserving relative paths.
///
/// Returns the copied paths relative to `dest`, sorted.
pub fn copy_files(spec: &CopyFiles, dest: &Path) -> Result<Vec<PathBuf>, CopyFilesError> {
    let mut copied = Vec::new();

    for (source, filenames) in spec.sources() {
        if !source.is_dir() {
            return Err(CopyFilesError::SourceMissing(source.to_path_buf()));
        }

        let patterns = filenames.patterns();
        let matcher = build_matcher(&patterns)?;
        let mut matched_any = vec![false; patterns.len()];

        for entry in WalkDir::new(source)
            .min_depth(1)
            .follow_links(false)
            .sort_by(|a, b| a.file_name().cmp(b.file_name()))
        {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let Ok(rel_path) = entry.path().strip_prefix(source) else {
                continue;
            };
            let hits = matcher.matches(rel_path);
            if hits.is_empty() {
                continue;
            }
            for hit in hits {
                if let Some(flag) = matched_any.get_mut(hit) {
                    *flag = true;
                }
            }

            let rel_target = place_file(entry.path(), rel_path, dest)?;
            debug!(from = %entry.path().display(), to = %rel_target.display(), "copied input file");
            copied.push(rel_target);
        }

        for (pattern, matched) in patterns.iter().zip(matched_any) {
            if !matched {
                warn!(source = %source.display(), pattern, "no files matched");
            }
        }
    }

    copied.sort();
    copied.dedup();
    Ok(copied)
}
