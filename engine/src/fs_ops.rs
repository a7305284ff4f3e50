//! Filesystem operations module.
//!
//! This module provides low-level operations for:
//! - Expanding user-selected paths into a flat, ordered list of file tasks
//! - Opening a wipe target and writing one overwrite pass
//! - Verifying the final pass by reading it back
//! - The destruction step run after the last pass
//! - Removing folders emptied by a session

use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use crate::config::DestructionPolicy;
use crate::error::{TaskError, TaskErrorKind, TaskFailure};
use crate::pattern::PassPlan;
use crate::task::WipeTask;

/// Result of expanding the selection.
#[derive(Debug, Default)]
pub struct Expansion {
    /// One task per file, in depth-first, name-sorted order
    pub tasks: Vec<WipeTask>,
    /// Folders that were expanded, parents before children
    pub directories: Vec<PathBuf>,
}

impl Expansion {
    /// Files are keyed by canonical path, so the same file reached twice
    /// (directly and through a followed link) is wiped once.
    fn push_task(&mut self, seen: &mut HashSet<PathBuf>, path: PathBuf, size: u64) {
        let key = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        if seen.insert(key) {
            let index = self.tasks.len();
            self.tasks.push(WipeTask::new(index, path, size));
        }
    }

    fn push_failed(&mut self, seen: &mut HashSet<PathBuf>, path: PathBuf, error: TaskError) {
        if seen.insert(path.clone()) {
            tracing::warn!(
                path = %path.display(),
                error = %error,
                "target rejected during expansion"
            );
            let index = self.tasks.len();
            self.tasks.push(WipeTask::failed(index, path, error));
        }
    }
}

/// Expand files and folders into file tasks.
///
/// Folders are walked depth-first with entries sorted by name. Links found
/// inside a folder are never wiped through unless `follow_symlinks` is set,
/// and even then only when they resolve inside that folder; rejected links
/// and symlink cycles become Failed tasks for the offending entry. Paths that
/// do not exist yet still produce a Pending task; the worker will classify it
/// as Missing. Each file appears at most once.
pub fn expand_targets<P: AsRef<Path>>(paths: &[P], follow_symlinks: bool) -> Expansion {
    let mut expansion = Expansion::default();
    let mut seen = HashSet::new();

    for root in paths {
        let root = root.as_ref();
        let link_meta = match fs::symlink_metadata(root) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                expansion.push_task(&mut seen, root.to_path_buf(), 0);
                continue;
            }
            Err(e) => {
                expansion.push_failed(&mut seen, root.to_path_buf(), TaskError::from_io(&e));
                continue;
            }
        };

        let is_link = link_meta.file_type().is_symlink();
        if is_link && !follow_symlinks {
            expansion.push_failed(&mut seen, root.to_path_buf(), symlink_error(root));
            continue;
        }

        let meta = if is_link {
            match fs::metadata(root) {
                Ok(meta) => meta,
                // dangling link
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    expansion.push_task(&mut seen, root.to_path_buf(), 0);
                    continue;
                }
                Err(e) => {
                    expansion.push_failed(&mut seen, root.to_path_buf(), TaskError::from_io(&e));
                    continue;
                }
            }
        } else {
            link_meta
        };

        if meta.is_dir() {
            expand_directory(root, follow_symlinks, &mut expansion, &mut seen);
        } else if is_link {
            // wipe the link's target rather than the link itself
            let target = fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
            expansion.push_task(&mut seen, target, meta.len());
        } else {
            expansion.push_task(&mut seen, root.to_path_buf(), meta.len());
        }
    }

    expansion
}

fn expand_directory(
    root: &Path,
    follow_symlinks: bool,
    expansion: &mut Expansion,
    seen: &mut HashSet<PathBuf>,
) {
    expansion.directories.push(root.to_path_buf());

    // links may only be followed to targets inside the selected folder
    let boundary = if follow_symlinks {
        fs::canonicalize(root).ok()
    } else {
        None
    };

    let mut walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(boundary.is_some())
        .sort_by_file_name()
        .into_iter();

    while let Some(entry) = walker.next() {
        match entry {
            Ok(entry) => {
                let file_type = entry.file_type();
                if entry.path_is_symlink() {
                    let error = match &boundary {
                        None => Some(symlink_error(entry.path())),
                        Some(boundary) if !resolves_within(entry.path(), boundary) => {
                            Some(outside_selection_error(entry.path()))
                        }
                        Some(_) => None,
                    };
                    if let Some(error) = error {
                        if file_type.is_dir() {
                            walker.skip_current_dir();
                        }
                        expansion.push_failed(seen, entry.into_path(), error);
                        continue;
                    }
                }

                if file_type.is_dir() {
                    if !entry.path_is_symlink() {
                        expansion.directories.push(entry.path().to_path_buf());
                    }
                } else if file_type.is_file() {
                    match entry.metadata() {
                        // a followed file link is wiped under its real name
                        Ok(meta) if entry.path_is_symlink() => {
                            let path = fs::canonicalize(entry.path())
                                .unwrap_or_else(|_| entry.path().to_path_buf());
                            expansion.push_task(seen, path, meta.len());
                        }
                        Ok(meta) => {
                            expansion.push_task(seen, entry.into_path(), meta.len());
                        }
                        Err(e) => {
                            let path = entry.into_path();
                            let error = e
                                .io_error()
                                .map(TaskError::from_io)
                                .unwrap_or_else(|| {
                                    TaskError::new(TaskErrorKind::Io, e.to_string())
                                });
                            expansion.push_failed(seen, path, error);
                        }
                    }
                } else {
                    tracing::debug!(path = %entry.path().display(), "skipping special file");
                }
            }
            Err(err) => {
                let path = err.path().unwrap_or(root).to_path_buf();
                if let Some(ancestor) = err.loop_ancestor() {
                    let error = TaskError::new(
                        TaskErrorKind::FilesystemLoop,
                        format!("link loops back to {}", ancestor.display()),
                    );
                    expansion.push_failed(seen, path, error);
                    continue;
                }
                match err.io_error() {
                    // broken link: let the worker report it as Missing
                    Some(io_err) if io_err.kind() == io::ErrorKind::NotFound => {
                        expansion.push_task(seen, path, 0);
                    }
                    Some(io_err) => expansion.push_failed(seen, path, TaskError::from_io(io_err)),
                    None => expansion.push_failed(
                        seen,
                        path,
                        TaskError::new(TaskErrorKind::Io, err.to_string()),
                    ),
                }
            }
        }
    }
}

fn resolves_within(path: &Path, boundary: &Path) -> bool {
    fs::canonicalize(path).map_or(false, |target| target.starts_with(boundary))
}

fn outside_selection_error(path: &Path) -> TaskError {
    TaskError::new(
        TaskErrorKind::Symlink,
        format!("{} links outside the selected folder", path.display()),
    )
}

fn symlink_error(path: &Path) -> TaskError {
    TaskError::new(
        TaskErrorKind::Symlink,
        format!("{} is a symbolic link and links are not followed", path.display()),
    )
}

/// Open a target for overwriting.
///
/// The existence check happens immediately before the open so a file removed
/// by someone else is classified as Missing rather than Failed.
pub(crate) fn open_target(path: &Path, follow_symlinks: bool) -> Result<File, TaskFailure> {
    let meta = fs::symlink_metadata(path)?;
    if meta.file_type().is_symlink() && !follow_symlinks {
        return Err(symlink_error(path).into());
    }
    if meta.is_dir() {
        let message = format!("{} is a directory", path.display());
        return Err(TaskError::new(TaskErrorKind::Io, message).into());
    }
    let file = OpenOptions::new().read(true).write(true).open(path)?;
    Ok(file)
}

/// Write one pass over the first `len` bytes of `file` and flush it to storage.
///
/// `on_write` is invoked with the size of every completed write call.
pub(crate) fn write_pass<F>(
    file: &mut File,
    plan: &PassPlan,
    len: u64,
    buffer: &mut [u8],
    mut on_write: F,
) -> io::Result<()>
where
    F: FnMut(u64),
{
    file.seek(SeekFrom::Start(0))?;
    let mut stream = plan.stream();
    let mut remaining = len;
    while remaining > 0 {
        let chunk = remaining.min(buffer.len() as u64) as usize;
        stream.fill(&mut buffer[..chunk]);
        file.write_all(&buffer[..chunk])?;
        remaining -= chunk as u64;
        on_write(chunk as u64);
    }
    file.flush()?;
    file.sync_all()?;
    Ok(())
}

/// Read the first `len` bytes back and compare them with `plan`'s stream.
pub(crate) fn verify_pass(
    file: &mut File,
    plan: &PassPlan,
    len: u64,
    chunk_size: usize,
) -> Result<(), TaskFailure> {
    file.seek(SeekFrom::Start(0))?;
    let chunk_size = chunk_size.max(1);
    let mut expected = vec![0u8; chunk_size];
    let mut actual = vec![0u8; chunk_size];
    let mut stream = plan.stream();
    let mut offset = 0u64;
    while offset < len {
        let chunk = (len - offset).min(chunk_size as u64) as usize;
        stream.fill(&mut expected[..chunk]);
        file.read_exact(&mut actual[..chunk])?;
        if expected[..chunk] != actual[..chunk] {
            return Err(TaskError::new(
                TaskErrorKind::VerificationFailed,
                format!("content differs from pass '{}' near offset {}", plan.label(), offset),
            )
            .into());
        }
        offset += chunk as u64;
    }
    Ok(())
}

/// Apply the post-wipe destruction step.
pub(crate) fn destroy(path: &Path, file: File, policy: DestructionPolicy) -> io::Result<()> {
    match policy {
        DestructionPolicy::Keep => {
            drop(file);
            Ok(())
        }
        DestructionPolicy::Truncate => {
            file.set_len(0)?;
            file.sync_all()?;
            Ok(())
        }
        DestructionPolicy::Delete => {
            file.set_len(0)?;
            file.sync_all()?;
            drop(file);

            let epoch = filetime::FileTime::zero();
            if let Err(e) = filetime::set_file_times(path, epoch, epoch) {
                tracing::debug!(path = %path.display(), error = %e, "could not reset timestamps");
            }

            let anonymous = anonymous_sibling(path);
            let target = match fs::rename(path, &anonymous) {
                Ok(()) => anonymous,
                Err(e) => {
                    tracing::debug!(
                        path = %path.display(),
                        error = %e,
                        "could not rename before delete"
                    );
                    path.to_path_buf()
                }
            };
            fs::remove_file(&target)
        }
    }
}

/// A random file name in the same directory, unlinking the original name from the content.
fn anonymous_sibling(path: &Path) -> PathBuf {
    let name: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();
    match path.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

/// Remove folders deepest-first, leaving any that are not empty.
///
/// Returns the number of folders removed.
pub fn remove_empty_directories(directories: &[PathBuf]) -> usize {
    let mut ordered: Vec<&PathBuf> = directories.iter().collect();
    ordered.sort_by_key(|d| std::cmp::Reverse(d.components().count()));

    let mut removed = 0;
    for dir in ordered {
        match fs::remove_dir(dir) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %dir.display(), error = %e, "folder kept after wipe");
            }
        }
    }
    removed
}
