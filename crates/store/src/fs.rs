//! Moving trees between the store and the real filesystem.

use crate::digest::FileContent;
use crate::error::{ErrorKind, Result};
use async_stream::stream;
use futures::Stream;
use std::path::{Path, PathBuf};
use tokio::fs;

#[cfg(unix)]
fn is_executable(metadata: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}
#[cfg(not(unix))]
fn is_executable(_metadata: &std::fs::Metadata) -> bool {
    false
}

#[cfg(unix)]
fn permissions(is_executable: bool, read_only: bool) -> std::fs::Permissions {
    use std::os::unix::fs::PermissionsExt;
    let mode = match (is_executable, read_only) {
        (true, true) => 0o555,
        (true, false) => 0o755,
        (false, true) => 0o444,
        (false, false) => 0o644,
    };
    std::fs::Permissions::from_mode(mode)
}

/// Writes a single file below `root`, creating parent directories.
pub(crate) async fn write_file(root: &Path, path: &Path, content: &[u8], is_executable: bool, read_only: bool) -> Result<()> {
    let target = root.join(path);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).await.map_err(ErrorKind::Io)?;
    }
    fs::write(&target, content).await.map_err(ErrorKind::Io)?;
    #[cfg(unix)]
    fs::set_permissions(&target, permissions(is_executable, read_only)).await.map_err(ErrorKind::Io)?;
    #[cfg(not(unix))]
    {
        let _ = is_executable;
        if read_only {
            let mut perms = fs::metadata(&target).await.map_err(ErrorKind::Io)?.permissions();
            perms.set_readonly(true);
            fs::set_permissions(&target, perms).await.map_err(ErrorKind::Io)?;
        }
    }
    Ok(())
}

/// Reads one declared file, relative to `root`.
pub(crate) async fn read_file(root: &Path, path: &Path) -> Result<FileContent> {
    let absolute = root.join(path);
    let metadata = match fs::metadata(&absolute).await {
        Ok(metadata) if metadata.is_file() => metadata,
        Ok(_) => exn::bail!(ErrorKind::NotFound(path.to_path_buf())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => exn::bail!(ErrorKind::NotFound(path.to_path_buf())),
        Err(e) => exn::bail!(ErrorKind::Io(e)),
    };
    let content = fs::read(&absolute).await.map_err(ErrorKind::Io)?;
    Ok(FileContent::new(path, content).executable(is_executable(&metadata)))
}

/// Lists every regular file below `root/dir`, yielding paths relative to
/// `root`. Symlinks are followed; dangling ones are skipped.
pub(crate) fn walk(root: PathBuf, dir: PathBuf) -> impl Stream<Item = Result<PathBuf>> {
    stream! {
        let mut stack = vec![dir];
        'dirs: while let Some(current) = stack.pop() {
            let mut entries = match fs::read_dir(root.join(&current)).await {
                Ok(entries) => entries,
                Err(e) => {
                    yield Err(exn::Exn::from(ErrorKind::Io(e)));
                    continue 'dirs;
                },
            };
            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => { yield Err(exn::Exn::from(ErrorKind::Io(e))); continue 'dirs; },
                };
                let relative = current.join(entry.file_name());
                match fs::metadata(entry.path()).await {
                    Ok(metadata) if metadata.is_dir() => stack.push(relative),
                    Ok(metadata) if metadata.is_file() => yield Ok(relative),
                    Ok(_) => {},
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        tracing::debug!(path = %relative.display(), "Skipping dangling symlink");
                    },
                    Err(e) => yield Err(exn::Exn::from(ErrorKind::Io(e))),
                }
            }
        }
    }
}

/// Checks that a declared directory exists below `root`.
pub(crate) async fn require_dir(root: &Path, dir: &Path) -> Result<()> {
    match fs::metadata(root.join(dir)).await {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => exn::bail!(ErrorKind::NotFound(dir.to_path_buf())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => exn::bail!(ErrorKind::NotFound(dir.to_path_buf())),
        Err(e) => exn::bail!(ErrorKind::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn walk_lists_nested_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("out/nested/deeper")).unwrap();
        std::fs::create_dir_all(temp_dir.path().join("out/empty")).unwrap();
        std::fs::write(temp_dir.path().join("out/a.txt"), b"a").unwrap();
        std::fs::write(temp_dir.path().join("out/nested/deeper/b.txt"), b"b").unwrap();
        std::fs::write(temp_dir.path().join("outside.txt"), b"c").unwrap();

        let mut files: Vec<PathBuf> = walk(temp_dir.path().to_path_buf(), PathBuf::from("out")).try_collect().await.unwrap();
        files.sort();
        assert_eq!(files, vec![PathBuf::from("out/a.txt"), PathBuf::from("out/nested/deeper/b.txt")]);
    }

    #[tokio::test]
    async fn read_file_reports_missing_path() {
        let temp_dir = tempfile::tempdir().unwrap();
        let err = read_file(temp_dir.path(), Path::new("nope.txt")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(p) if p == Path::new("nope.txt")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn write_then_read_keeps_executable_bit() {
        let temp_dir = tempfile::tempdir().unwrap();
        write_file(temp_dir.path(), Path::new("bin/run.sh"), b"#!/bin/sh\n", true, true).await.unwrap();
        let file = read_file(temp_dir.path(), Path::new("bin/run.sh")).await.unwrap();
        assert!(file.is_executable);
        assert_eq!(file.content, b"#!/bin/sh\n");
        let metadata = std::fs::metadata(temp_dir.path().join("bin/run.sh")).unwrap();
        assert!(metadata.permissions().readonly());
    }
}
