//! Packaging of application bits for upload.
//!
//! A file path (jar, war, zip) is uploaded as-is. A directory is zipped in
//! memory with paths relative to the directory root, leaving out VCS
//! metadata and anything matched by a `.cfignore` at the root. The
//! `.cfignore` patterns use gitignore syntax.

use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{PlatformError, Result};

/// Entries never uploaded from a directory.
const IGNORED_ENTRIES: &[&str] = &[".git", ".hg", ".svn", ".DS_Store", CFIGNORE];

/// Ignore file read from the root of an application directory.
const CFIGNORE: &str = ".cfignore";

/// Returns the bytes to upload for an application path.
///
/// # Errors
///
/// Returns a packaging error if the path does not exist or cannot be read.
pub fn package_bits(path: &Path) -> Result<Vec<u8>> {
    if path.is_file() {
        debug!("Uploading archive {} as-is", path.display());
        return fs::read(path).map_err(|e| packaging(path, e));
    }

    if !path.is_dir() {
        return Err(packaging(path, "path does not exist"));
    }

    let ignored = cfignore(path)?;
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let count = add_directory(&mut writer, &ignored, path, path)?;
    let cursor = writer.finish().map_err(|e| packaging(path, e))?;
    let bytes = cursor.into_inner();

    debug!(
        "Packaged {count} files from {} ({} bytes)",
        path.display(),
        bytes.len()
    );
    Ok(bytes)
}

/// Loads the `.cfignore` patterns of `root`, if any.
fn cfignore(root: &Path) -> Result<Gitignore> {
    let mut builder = GitignoreBuilder::new(root);
    let file = root.join(CFIGNORE);
    let error = if file.is_file() { builder.add(&file) } else { None };
    if let Some(e) = error {
        return Err(packaging(&file, e));
    }
    builder.build().map_err(|e| packaging(&file, e))
}

fn add_directory(
    writer: &mut ZipWriter<Cursor<Vec<u8>>>,
    ignored: &Gitignore,
    root: &Path,
    dir: &Path,
) -> Result<usize> {
    let mut entries = fs::read_dir(dir)
        .and_then(|entries| entries.collect::<std::io::Result<Vec<_>>>())
        .map_err(|e| packaging(dir, e))?;
    entries.sort_by_key(fs::DirEntry::file_name);

    let mut count = 0;
    for entry in entries {
        let file_name = entry.file_name();
        if IGNORED_ENTRIES.iter().any(|ignored| file_name == *ignored) {
            continue;
        }

        let path = entry.path();
        let name = entry_name(root, &path);
        let mut file_type = entry.file_type().map_err(|e| packaging(&path, e))?;

        // Symlinked files are uploaded with their target's contents.
        if file_type.is_symlink() {
            file_type = fs::metadata(&path)
                .map_err(|e| packaging(&path, e))?
                .file_type();
            if file_type.is_dir() {
                warn!("Skipping symlinked directory {name}");
                continue;
            }
        }

        if ignored.matched(&path, file_type.is_dir()).is_ignore() {
            debug!("Ignoring {name} (.cfignore)");
            continue;
        }

        if file_type.is_dir() {
            writer
                .add_directory(format!("{name}/"), file_options(&path)?)
                .map_err(|e| packaging(&path, e))?;
            count += add_directory(writer, ignored, root, &path)?;
        } else if file_type.is_file() {
            let contents = fs::read(&path).map_err(|e| packaging(&path, e))?;
            writer
                .start_file(name, file_options(&path)?)
                .map_err(|e| packaging(&path, e))?;
            writer
                .write_all(&contents)
                .map_err(|e| packaging(&path, e))?;
            count += 1;
        }
    }

    Ok(count)
}

/// Archive name with forward slashes, relative to the root.
fn entry_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(unix)]
fn file_options(path: &Path) -> Result<SimpleFileOptions> {
    use std::os::unix::fs::PermissionsExt;

    let mode = fs::metadata(path)
        .map_err(|e| packaging(path, e))?
        .permissions()
        .mode();
    Ok(SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(mode))
}

#[cfg(not(unix))]
fn file_options(_path: &Path) -> Result<SimpleFileOptions> {
    Ok(SimpleFileOptions::default().compression_method(CompressionMethod::Deflated))
}

fn packaging(path: &Path, message: impl std::fmt::Display) -> crate::error::PushError {
    PlatformError::Packaging {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
    .into()
}
