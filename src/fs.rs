//! C9: the pluggable filesystem the log is generic over.
//!
//! The log never touches `std::fs` directly. Instead it is generic over
//! [`Filesystem`], a small trait exposing exactly the primitives the log
//! needs. This lets the crate's own test suite run entirely in memory (no
//! temp-directory cleanup, no real disk I/O) via [`MemoryFilesystem`], while
//! production callers use [`OsFilesystem`].

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use tempfile::NamedTempFile;

/// Storage primitives the write-ahead log needs from its filesystem.
///
/// Implementations must make [`Filesystem::rename`] atomic with respect to
/// concurrent readers of the destination path on the same filesystem: the
/// truncation engine's crash safety depends on it.
pub trait Filesystem: Clone + Send + Sync + Debug + 'static {
    /// An open handle used only for sequential appending.
    type File: Write + Send;

    /// Creates `dir` and any missing parent directories. Must not fail if
    /// `dir` already exists.
    fn mkdir_all(&self, dir: &Path) -> io::Result<()>;

    /// Lists the entries directly inside `dir`. Order is unspecified.
    fn read_dir(&self, dir: &Path) -> io::Result<Vec<PathBuf>>;

    /// Reads the entire contents of the file at `path`.
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Atomically (write-then-rename) creates or replaces the file at `path`
    /// with exactly `data`.
    fn write(&self, path: &Path, data: &[u8]) -> io::Result<()>;

    /// Opens `path` for appending, creating it if it does not exist, and
    /// returns the handle along with the file's current length.
    fn open_append(&self, path: &Path) -> io::Result<(Self::File, u64)>;

    /// Removes the file at `path`. Returns [`io::ErrorKind::NotFound`] if it
    /// does not exist.
    fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Atomically renames `from` to `to`, overwriting `to` if it exists.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Flushes and fsyncs an open append handle.
    fn sync_file(&self, file: &mut Self::File) -> io::Result<()>;
}

/// Filesystem backed by ordinary OS files.
#[derive(Clone, Debug, Default)]
pub struct OsFilesystem {
    #[cfg(unix)]
    dir_mode: Option<u32>,
    #[cfg(unix)]
    file_mode: Option<u32>,
}

impl OsFilesystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the unix permission bits applied to directories this filesystem
    /// creates. Ignored on non-unix platforms.
    #[cfg(unix)]
    pub fn with_dir_mode(mut self, mode: u32) -> Self {
        self.dir_mode = Some(mode);
        self
    }

    /// Sets the unix permission bits applied to files this filesystem
    /// creates. Ignored on non-unix platforms.
    #[cfg(unix)]
    pub fn with_file_mode(mut self, mode: u32) -> Self {
        self.file_mode = Some(mode);
        self
    }

    #[cfg(unix)]
    fn chmod(&self, path: &Path, mode: Option<u32>) -> io::Result<()> {
        if let Some(mode) = mode {
            fs::set_permissions(path, std::os::unix::fs::PermissionsExt::from_mode(mode))?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn chmod(&self, _path: &Path, _mode: Option<u32>) -> io::Result<()> {
        Ok(())
    }
}

impl Filesystem for OsFilesystem {
    type File = fs::File;

    fn mkdir_all(&self, dir: &Path) -> io::Result<()> {
        fs::create_dir_all(dir)?;
        #[cfg(unix)]
        self.chmod(dir, self.dir_mode)?;
        Ok(())
    }

    fn read_dir(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(dir)? {
            out.push(entry?.path());
        }
        Ok(out)
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        fs::read(path)
    }

    fn write(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        #[cfg(unix)]
        self.chmod(path, self.file_mode)?;
        Ok(())
    }

    fn open_append(&self, path: &Path) -> io::Result<(Self::File, u64)> {
        let file = fs::OpenOptions::new().create(true).append(true).open(path)?;
        #[cfg(unix)]
        self.chmod(path, self.file_mode)?;
        let len = file.metadata()?.len();
        Ok((file, len))
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn sync_file(&self, file: &mut Self::File) -> io::Result<()> {
        file.sync_all()
    }
}

type SharedBytes = Arc<RwLock<Vec<u8>>>;

/// An append-only in-memory file.
///
/// Mirrors `O_APPEND` semantics: every [`io::Write::write`] call extends the
/// buffer regardless of any notion of a cursor, since this handle is only
/// ever used for sequential appending (see [`Filesystem::File`]).
#[derive(Debug)]
pub struct MemoryFile(SharedBytes);

impl Write for MemoryFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// In-memory [`Filesystem`], used by the crate's own test suite and
/// available to downstream callers under the `test` feature.
#[derive(Clone, Debug, Default)]
pub struct MemoryFilesystem {
    files: Arc<RwLock<BTreeMap<PathBuf, SharedBytes>>>,
    dirs: Arc<RwLock<std::collections::BTreeSet<PathBuf>>>,
}

impl MemoryFilesystem {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Filesystem for MemoryFilesystem {
    type File = MemoryFile;

    fn mkdir_all(&self, dir: &Path) -> io::Result<()> {
        self.dirs.write().unwrap().insert(dir.to_path_buf());
        Ok(())
    }

    fn read_dir(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        let files = self.files.read().unwrap();
        Ok(files
            .keys()
            .filter(|p| p.parent() == Some(dir))
            .cloned()
            .collect())
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        let files = self.files.read().unwrap();
        match files.get(path) {
            Some(buf) => Ok(buf.read().unwrap().clone()),
            None => Err(io::Error::new(io::ErrorKind::NotFound, format!("{}: not found", path.display()))),
        }
    }

    fn write(&self, path: &Path, data: &[u8]) -> io::Result<()> {
        let mut files = self.files.write().unwrap();
        files.insert(path.to_path_buf(), Arc::new(RwLock::new(data.to_vec())));
        Ok(())
    }

    fn open_append(&self, path: &Path) -> io::Result<(Self::File, u64)> {
        let mut files = self.files.write().unwrap();
        let buf = files.entry(path.to_path_buf()).or_insert_with(|| Arc::new(RwLock::new(Vec::new())));
        let len = buf.read().unwrap().len() as u64;
        Ok((MemoryFile(Arc::clone(buf)), len))
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        let mut files = self.files.write().unwrap();
        if files.remove(path).is_none() {
            return Err(io::Error::new(io::ErrorKind::NotFound, format!("{}: not found", path.display())));
        }
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mut files = self.files.write().unwrap();
        let buf = files
            .remove(from)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("{}: not found", from.display())))?;
        files.insert(to.to_path_buf(), buf);
        Ok(())
    }

    fn sync_file(&self, _file: &mut Self::File) -> io::Result<()> {
        Ok(())
    }
}
