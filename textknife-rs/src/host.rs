//! External collaborators the interpreter talks to.
//!
//! The engine never touches the filesystem or a logger directly.  It goes
//! through three traits, bundled in a [`Host`]:
//!
//! | Trait            | Default        | Purpose                                  |
//! |------------------|----------------|------------------------------------------|
//! | [`TextFiles`]    | [`StdFiles`]   | read a file as lines, write lines        |
//! | [`OsPrimitives`] | [`StdOs`]      | path helpers, working directory, listing |
//! | [`LogSink`]      | [`TracingSink`]| leveled script output                    |
//!
//! [`StdOs`] keeps its own working directory instead of changing the
//! process-wide one, so several engines can coexist in one process.

use std::cell::RefCell;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::Level;

use crate::pattern::Matcher;
use crate::script::buffer::split_lines;

// ── Text files ────────────────────────────────────────────────────────────────

pub trait TextFiles {
    /// Read the whole file as lines, line terminators stripped.
    fn read_lines(&self, path: &Path) -> io::Result<Vec<String>>;

    /// Write `lines` joined with `\n`, with a trailing newline.
    fn write_lines(&self, path: &Path, lines: &[String]) -> io::Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StdFiles;

impl TextFiles for StdFiles {
    fn read_lines(&self, path: &Path) -> io::Result<Vec<String>> {
        let text = fs::read_to_string(path)?;
        Ok(split_lines(&text)
            .into_iter()
            .map(|mut l| {
                if l.ends_with('\r') {
                    l.pop();
                }
                l
            })
            .collect())
    }

    fn write_lines(&self, path: &Path, lines: &[String]) -> io::Result<()> {
        let mut text = lines.join("\n");
        if !lines.is_empty() {
            text.push('\n');
        }
        fs::write(path, text)
    }
}

// ── OS primitives ─────────────────────────────────────────────────────────────

pub trait OsPrimitives {
    /// Final path component, or the empty string.
    fn basename(&self, path: &str) -> String {
        Path::new(path)
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Everything but the final component; `.` for a bare file name.
    fn dirname(&self, path: &str) -> String {
        match Path::new(path).parent() {
            Some(p) if p.as_os_str().is_empty() => ".".to_owned(),
            Some(p) => p.to_string_lossy().into_owned(),
            None => path.to_owned(),
        }
    }

    /// Replace (or add) the extension; an empty `ext` strips it.
    fn change_extension(&self, path: &str, ext: &str) -> String {
        let ext = ext.trim_start_matches('.');
        Path::new(path)
            .with_extension(ext)
            .to_string_lossy()
            .into_owned()
    }

    /// Resolve `path` against the current working directory.
    fn resolve(&self, path: &Path) -> PathBuf;

    fn pwd(&self) -> PathBuf;

    fn cd(&mut self, path: &Path) -> io::Result<()>;

    /// Save the working directory and change to `path`.
    fn pushd(&mut self, path: &Path) -> io::Result<()>;

    /// Return to the most recently pushed directory.
    fn popd(&mut self) -> io::Result<PathBuf>;

    /// Create `path` and any missing parents.
    fn mkdir(&self, path: &Path) -> bool;

    fn isdir(&self, path: &Path) -> bool;

    fn exists(&self, path: &Path) -> bool;

    /// Sorted entry names of `dir`, filtered by the optional matchers.
    fn list_files(
        &self,
        dir: &Path,
        include: Option<&dyn Matcher>,
        exclude: Option<&dyn Matcher>,
        files_only: bool,
    ) -> io::Result<Vec<String>>;

    fn copy(&self, src: &Path, dst: &Path) -> bool;
}

/// [`OsPrimitives`] over `std::fs` with a private working directory.
#[derive(Debug, Clone)]
pub struct StdOs {
    cwd: PathBuf,
    stack: Vec<PathBuf>,
}

impl Default for StdOs {
    fn default() -> Self {
        Self::new()
    }
}

impl StdOs {
    /// Start in the process's working directory.
    pub fn new() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        StdOs::in_dir(cwd)
    }

    pub fn in_dir(cwd: impl Into<PathBuf>) -> Self {
        StdOs {
            cwd: cwd.into(),
            stack: Vec::new(),
        }
    }
}

impl OsPrimitives for StdOs {
    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.cwd.join(path)
        }
    }

    fn pwd(&self) -> PathBuf {
        self.cwd.clone()
    }

    fn cd(&mut self, path: &Path) -> io::Result<()> {
        let target = self.resolve(path);
        if !target.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not a directory", target.display()),
            ));
        }
        self.cwd = fs::canonicalize(&target).unwrap_or(target);
        Ok(())
    }

    fn pushd(&mut self, path: &Path) -> io::Result<()> {
        let saved = self.cwd.clone();
        self.cd(path)?;
        self.stack.push(saved);
        Ok(())
    }

    fn popd(&mut self) -> io::Result<PathBuf> {
        let dir = self
            .stack
            .pop()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "directory stack is empty"))?;
        self.cwd = dir.clone();
        Ok(dir)
    }

    fn mkdir(&self, path: &Path) -> bool {
        fs::create_dir_all(self.resolve(path)).is_ok()
    }

    fn isdir(&self, path: &Path) -> bool {
        self.resolve(path).is_dir()
    }

    fn exists(&self, path: &Path) -> bool {
        self.resolve(path).exists()
    }

    fn list_files(
        &self,
        dir: &Path,
        include: Option<&dyn Matcher>,
        exclude: Option<&dyn Matcher>,
        files_only: bool,
    ) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.resolve(dir))? {
            let entry = entry?;
            if files_only && !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if include.is_some_and(|m| !m.is_match(&name)) {
                continue;
            }
            if exclude.is_some_and(|m| m.is_match(&name)) {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    fn copy(&self, src: &Path, dst: &Path) -> bool {
        fs::copy(self.resolve(src), self.resolve(dst)).is_ok()
    }
}

// ── Logging ───────────────────────────────────────────────────────────────────

/// Receiver for the messages scripts emit with `log` and `stop`.
pub trait LogSink {
    fn log(&mut self, level: Level, message: &str);
}

/// Forwards script output to `tracing` under target `textknife::script`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&mut self, level: Level, message: &str) {
        match level {
            Level::ERROR => tracing::error!(target: "textknife::script", "{message}"),
            Level::WARN => tracing::warn!(target: "textknife::script", "{message}"),
            Level::INFO => tracing::info!(target: "textknife::script", "{message}"),
            Level::DEBUG => tracing::debug!(target: "textknife::script", "{message}"),
            _ => tracing::trace!(target: "textknife::script", "{message}"),
        }
    }
}

/// Collects messages in memory; clones share the same record list.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    records: Rc<RefCell<Vec<(Level, String)>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<(Level, String)> {
        self.records.borrow().clone()
    }

    /// Message texts only, in emission order.
    pub fn messages(&self) -> Vec<String> {
        self.records.borrow().iter().map(|(_, m)| m.clone()).collect()
    }

    pub fn clear(&self) {
        self.records.borrow_mut().clear();
    }
}

impl LogSink for MemorySink {
    fn log(&mut self, level: Level, message: &str) {
        self.records.borrow_mut().push((level, message.to_owned()));
    }
}

// ── Bundle ────────────────────────────────────────────────────────────────────

/// Everything the interpreter needs from the outside world.
pub struct Host {
    pub files: Box<dyn TextFiles>,
    pub os: Box<dyn OsPrimitives>,
    pub log: Box<dyn LogSink>,
}

impl Host {
    pub fn new(
        files: Box<dyn TextFiles>,
        os: Box<dyn OsPrimitives>,
        log: Box<dyn LogSink>,
    ) -> Self {
        Host { files, os, log }
    }

    /// Standard filesystem access with the given log sink.
    pub fn with_sink(log: Box<dyn LogSink>) -> Self {
        Host::new(Box::new(StdFiles), Box::new(StdOs::new()), log)
    }
}

impl Default for Host {
    fn default() -> Self {
        Host::with_sink(Box::new(TracingSink))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{RegexMatcher, RegexSpec};

    #[test]
    fn path_helpers() {
        let os = StdOs::in_dir("/tmp");
        assert_eq!(os.basename("/a/b/c.txt"), "c.txt");
        assert_eq!(os.dirname("/a/b/c.txt"), "/a/b");
        assert_eq!(os.dirname("c.txt"), ".");
        assert_eq!(os.change_extension("/a/b/c.txt", "md"), "/a/b/c.md");
        assert_eq!(os.change_extension("c.txt", ".bak"), "c.bak");
        assert_eq!(os.change_extension("c.txt", ""), "c");
    }

    #[test]
    fn files_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        let lines = vec!["one".to_owned(), "".to_owned(), "three".to_owned()];
        StdFiles.write_lines(&path, &lines).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "one\n\nthree\n");
        assert_eq!(StdFiles.read_lines(&path).unwrap(), lines);
    }

    #[test]
    fn read_strips_carriage_returns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dos.txt");
        fs::write(&path, "a\r\nb\r\n").unwrap();
        assert_eq!(StdFiles.read_lines(&path).unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(StdFiles.read_lines(&dir.path().join("nope")).is_err());
    }

    #[test]
    fn directory_stack_is_private() {
        let dir = tempfile::tempdir().unwrap();
        let before = std::env::current_dir().unwrap();
        let mut os = StdOs::in_dir(dir.path());
        assert!(os.mkdir(Path::new("sub/deeper")));
        os.pushd(Path::new("sub")).unwrap();
        assert!(os.isdir(Path::new("deeper")));
        assert_eq!(os.popd().unwrap(), dir.path());
        assert!(os.popd().is_err());
        assert!(os.cd(Path::new("missing")).is_err());
        assert_eq!(std::env::current_dir().unwrap(), before);
    }

    #[test]
    fn list_files_filters() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.txt", "b.txt", "c.log"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        fs::create_dir(dir.path().join("d.txt")).unwrap();
        let os = StdOs::in_dir(dir.path());
        let include = RegexMatcher::new(&RegexSpec::new(r"\.txt$")).unwrap();
        let exclude = RegexMatcher::new(&RegexSpec::new("^b")).unwrap();
        let all = os.list_files(Path::new("."), None, None, false).unwrap();
        assert_eq!(all, vec!["a.txt", "b.txt", "c.log", "d.txt"]);
        let some = os
            .list_files(Path::new("."), Some(&include), Some(&exclude), true)
            .unwrap();
        assert_eq!(some, vec!["a.txt"]);
    }

    #[test]
    fn copy_and_exists() {
        let dir = tempfile::tempdir().unwrap();
        let os = StdOs::in_dir(dir.path());
        fs::write(dir.path().join("src"), "x").unwrap();
        assert!(os.copy(Path::new("src"), Path::new("dst")));
        assert!(os.exists(Path::new("dst")));
        assert!(!os.copy(Path::new("nope"), Path::new("dst2")));
    }

    #[test]
    fn memory_sink_shares_records() {
        let sink = MemorySink::new();
        let mut handle: Box<dyn LogSink> = Box::new(sink.clone());
        handle.log(Level::INFO, "hello");
        handle.log(Level::ERROR, "boom");
        assert_eq!(sink.messages(), vec!["hello", "boom"]);
        assert_eq!(sink.records()[1].0, Level::ERROR);
    }
}
