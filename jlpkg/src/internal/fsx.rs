//! Mostly [`fs`] extensions with extra error messaging.

use std::fs;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use camino::{Utf8Path, Utf8PathBuf};

/// Equivalent to [`fs::canonicalize`] with better error messages.
///
/// Uses [`dunce`] to generate more familiar paths on Windows.
pub fn canonicalize(p: impl AsRef<Path>) -> Result<PathBuf> {
    return inner(p.as_ref());

    fn inner(p: &Path) -> Result<PathBuf> {
        dunce::canonicalize(p)
            .with_context(|| format!("failed to get absolute path of `{}`", p.display()))
    }
}

/// Equivalent to [`fs::canonicalize`], but for Utf-8 paths, with better error messages.
pub fn canonicalize_utf8(p: impl AsRef<Path>) -> Result<Utf8PathBuf> {
    canonicalize(p)?.try_into_utf8()
}

/// Equivalent to [`fs::create_dir_all`] with better error messages.
pub fn create_dir_all(p: impl AsRef<Path>) -> Result<()> {
    return inner(p.as_ref());

    fn inner(p: &Path) -> Result<()> {
        fs::create_dir_all(p)
            .with_context(|| format!("failed to create directory `{}`", p.display()))?;
        Ok(())
    }
}

/// Equivalent to [`fs::remove_dir_all`] with better error messages.
pub fn remove_dir_all(p: impl AsRef<Path>) -> Result<()> {
    return inner(p.as_ref());

    fn inner(p: &Path) -> Result<()> {
        fs::remove_dir_all(p)
            .with_context(|| format!("failed to remove directory `{}`", p.display()))?;
        Ok(())
    }
}

/// Equivalent to [`fs::remove_file`] with better error messages.
pub fn remove_file(p: impl AsRef<Path>) -> Result<()> {
    return inner(p.as_ref());

    fn inner(p: &Path) -> Result<()> {
        fs::remove_file(p).with_context(|| format!("failed to remove file `{}`", p.display()))?;
        Ok(())
    }
}

/// Equivalent to [`fs::write`] with better error messages.
pub fn write(path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> Result<()> {
    return inner(path.as_ref(), contents.as_ref());

    fn inner(path: &Path, contents: &[u8]) -> Result<()> {
        fs::write(path, contents).with_context(|| format!("failed to write `{}`", path.display()))
    }
}

/// Equivalent to [`File::open`] with better error messages.
pub fn open(path: impl AsRef<Path>) -> Result<File> {
    return inner(path.as_ref());

    fn inner(path: &Path) -> Result<File> {
        File::open(path).with_context(|| format!("failed to open `{}`", path.display()))
    }
}

/// Equivalent to [`File::create`] with better error messages.
pub fn create(path: impl AsRef<Path>) -> Result<File> {
    return inner(path.as_ref());

    fn inner(path: &Path) -> Result<File> {
        File::create(path).with_context(|| format!("failed to create `{}`", path.display()))
    }
}

/// Equivalent to [`fs::read`] with better error messages.
pub fn read(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    return inner(path.as_ref());

    fn inner(path: &Path) -> Result<Vec<u8>> {
        fs::read(path).with_context(|| format!("failed to read `{}`", path.display()))
    }
}

/// Equivalent to [`fs::read_to_string`] with better error messages.
pub fn read_to_string(path: impl AsRef<Path>) -> Result<String> {
    return inner(path.as_ref());

    fn inner(path: &Path) -> Result<String> {
        fs::read_to_string(path).with_context(|| format!("failed to read `{}`", path.display()))
    }
}

/// Equivalent to [`fs::rename`] with better error messages.
pub fn rename(from: impl AsRef<Path>, to: impl AsRef<Path>) -> Result<()> {
    return inner(from.as_ref(), to.as_ref());

    fn inner(from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to).with_context(|| {
            format!(
                "failed to rename `{}` to `{}`",
                from.display(),
                to.display()
            )
        })
    }
}

/// Equivalent to [`fs::copy`] with better error messages.
pub fn copy(from: impl AsRef<Path>, to: impl AsRef<Path>) -> Result<u64> {
    return inner(from.as_ref(), to.as_ref());

    fn inner(from: &Path, to: &Path) -> Result<u64> {
        fs::copy(from, to)
            .with_context(|| format!("failed to copy file {} to {}", from.display(), to.display()))
    }
}

/// Writes `contents` to a sibling temporary file and atomically renames it over `path`.
///
/// Readers observing `path` see either the previous contents or the new ones,
/// never a torn write.
pub fn write_atomic(path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> Result<()> {
    return inner(path.as_ref(), contents.as_ref());

    fn inner(path: &Path, contents: &[u8]) -> Result<()> {
        let parent = path
            .parent()
            .ok_or_else(|| anyhow!("path `{}` has no parent directory", path.display()))?;
        let mut tmp = tempfile::Builder::new()
            .prefix(".jlpkg-tmp-")
            .tempfile_in(parent)
            .with_context(|| format!("failed to create temporary file in `{}`", parent.display()))?;
        tmp.write_all(contents)
            .with_context(|| format!("failed to write temporary file for `{}`", path.display()))?;
        tmp.flush()?;
        tmp.persist(path)
            .with_context(|| format!("failed to atomically replace `{}`", path.display()))?;
        Ok(())
    }
}

/// Appends a single line to `path`, creating the file if needed.
///
/// Relies on the platform's append-mode write atomicity for line-sized payloads.
pub fn append_line(path: impl AsRef<Path>, line: &str) -> Result<()> {
    return inner(path.as_ref(), line);

    fn inner(path: &Path, line: &str) -> Result<()> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open `{}` for append", path.display()))?;
        writeln!(file, "{line}")
            .with_context(|| format!("failed to append to `{}`", path.display()))?;
        Ok(())
    }
}

pub trait PathUtf8Ext {
    fn try_as_utf8(&'_ self) -> Result<&'_ Utf8Path>;

    fn try_to_utf8(&self) -> Result<Utf8PathBuf> {
        self.try_as_utf8().map(|p| p.to_path_buf())
    }
}

pub trait PathBufUtf8Ext {
    fn try_into_utf8(self) -> Result<Utf8PathBuf>;
}

impl PathUtf8Ext for Path {
    fn try_as_utf8(&'_ self) -> Result<&'_ Utf8Path> {
        Utf8Path::from_path(self)
            .ok_or_else(|| anyhow!("path `{}` is not UTF-8 encoded", self.display()))
    }
}

impl PathUtf8Ext for PathBuf {
    fn try_as_utf8(&'_ self) -> Result<&'_ Utf8Path> {
        self.as_path().try_as_utf8()
    }
}

impl PathBufUtf8Ext for PathBuf {
    fn try_into_utf8(self) -> Result<Utf8PathBuf> {
        Utf8PathBuf::from_path_buf(self)
            .map_err(|path| anyhow!("path `{}` is not UTF-8 encoded", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_atomic_replaces_contents() {
        let t = tempfile::tempdir().unwrap();
        let path = t.path().join("file.toml");
        write_atomic(&path, b"first").unwrap();
        assert_eq!(read_to_string(&path).unwrap(), "first");
        write_atomic(&path, b"second").unwrap();
        assert_eq!(read_to_string(&path).unwrap(), "second");
    }

    #[test]
    fn append_line_appends() {
        let t = tempfile::tempdir().unwrap();
        let path = t.path().join("log.toml");
        append_line(&path, "a = 1").unwrap();
        append_line(&path, "b = 2").unwrap();
        assert_eq!(read_to_string(&path).unwrap(), "a = 1\nb = 2\n");
    }
}
