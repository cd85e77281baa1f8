//! Mailbox storage: the shared directory both endpoints talk through.
//!
//! Nothing here keeps a file open between calls. Documents are replaced
//! whole through a hidden temporary sibling so a concurrent reader sees
//! either the previous or the next document, never a prefix of one.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;


const STATUS_FILE: &str = "status.json";
const WORLD_INFO_FILE: &str = "world_info.json";
const COMMANDS_FILE: &str = "commands.json";
const LAST_COMMAND_FILE: &str = "last_command.json";
const CAMERA_DIR: &str = "camera";
const SCREENSHOTS_DIR: &str = "screenshots";
const LOGS_DIR: &str = "logs";
const LOG_FILE: &str = "controller.log";

/// Attempts made when a read fails with something other than not-found.
const READ_ATTEMPTS: usize = 3;

/// File name patterns treated as images in the camera and screenshot stores.
const IMAGE_PATTERNS: [&str; 4] = ["*.png", "*.jpg", "*.jpeg", "*.ppm"];

/// Errors raised by mailbox operations
#[derive(Debug, Error)]
pub enum MailboxError {
    /// Filesystem failure on a specific path
    #[error("IO error on {}: {source}", path.display())]
    Io {
        /// Path being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },
    /// Document could not be encoded or decoded
    #[error("invalid JSON in {}: {source}", path.display())]
    Json {
        /// Path of the document
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },
    /// Value was not a JSON object where one is required
    #[error("expected a JSON object for {0}")]
    NotAnObject(&'static str),
}

impl MailboxError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result of reading a JSON document from the mailbox.
#[derive(Debug)]
pub enum Document<T> {
    /// The document was read and decoded.
    Present(T),
    /// There is no document (yet).
    Missing,
    /// The file exists but does not decode.
    Malformed(String),
}

impl<T> Document<T> {
    /// Returns the decoded value, treating malformed documents as absent.
    pub fn into_option(self) -> Option<T> {
        match self {
            Document::Present(value) => Some(value),
            Document::Missing | Document::Malformed(_) => None,
        }
    }
}

/// A file in one of the image stores.
#[derive(Debug, Clone, PartialEq)]
pub struct FileInfo {
    /// Absolute or mailbox-relative path of the file
    pub path: PathBuf,
    /// Time since the file was last modified
    pub age: Duration,
}

/// Handle on a mailbox directory.
///
/// Cheap to clone. Both the controller-side [`Publisher`](crate::Publisher)
/// and the tool-side [`Reader`](crate::Reader) take one explicitly.
#[derive(Debug, Clone)]
pub struct Mailbox {
    root: PathBuf,
}

impl Mailbox {
    /// Open a mailbox rooted at `root`, creating the directory tree if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, MailboxError> {
        let mailbox = Self { root: root.into() };
        mailbox.ensure_tree()?;
        Ok(mailbox)
    }

    /// Create any missing directory of the mailbox tree.
    ///
    /// Safe to call repeatedly; the controller calls it again after the
    /// directory was wiped underneath it.
    pub fn ensure_tree(&self) -> Result<(), MailboxError> {
        for dir in [
            self.root.clone(),
            self.camera_dir(),
            self.screenshots_dir(),
            self.root.join(LOGS_DIR),
        ] {
            fs::create_dir_all(&dir).map_err(|e| MailboxError::io(&dir, e))?;
        }
        Ok(())
    }

    /// Root directory of the mailbox.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the state document.
    pub fn status_path(&self) -> PathBuf {
        self.root.join(STATUS_FILE)
    }

    /// Path of the world info document.
    pub fn world_info_path(&self) -> PathBuf {
        self.root.join(WORLD_INFO_FILE)
    }

    /// Path of the pending command document.
    pub fn commands_path(&self) -> PathBuf {
        self.root.join(COMMANDS_FILE)
    }

    /// Path of the last claimed command record.
    pub fn last_command_path(&self) -> PathBuf {
        self.root.join(LAST_COMMAND_FILE)
    }

    /// Directory holding camera frames.
    pub fn camera_dir(&self) -> PathBuf {
        self.root.join(CAMERA_DIR)
    }

    /// Directory holding screenshots.
    pub fn screenshots_dir(&self) -> PathBuf {
        self.root.join(SCREENSHOTS_DIR)
    }

    /// Path of the controller log.
    pub fn log_path(&self) -> PathBuf {
        self.root.join(LOGS_DIR).join(LOG_FILE)
    }

    /// Serialize `value` and atomically replace the document at `path`.
    pub fn write_json<T: Serialize + ?Sized>(
        &self,
        path: &Path,
        value: &T,
    ) -> Result<(), MailboxError> {
        let bytes = serde_json::to_vec_pretty(value).map_err(|e| MailboxError::Json {
            path: path.to_path_buf(),
            source: e,
        })?;
        write_atomic(path, &bytes)
    }

    /// Read and decode the document at `path`.
    ///
    /// Never fails: a missing file is [`Document::Missing`], a file that
    /// does not decode is [`Document::Malformed`]. IO errors other than
    /// not-found are retried a few times and then reported as missing.
    pub fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Document<T> {
        let mut last_error = None;
        for _ in 0..READ_ATTEMPTS {
            match fs::read(path) {
                Ok(bytes) => {
                    return match serde_json::from_slice(&bytes) {
                        Ok(value) => Document::Present(value),
                        Err(e) => Document::Malformed(e.to_string()),
                    };
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Document::Missing,
                Err(e) => last_error = Some(e),
            }
        }
        if let Some(e) = last_error {
            tracing::debug!(path = %path.display(), error = %e, "mailbox read failed");
        }
        Document::Missing
    }

    /// Remove a file, ignoring a file that is already gone.
    pub fn remove(&self, path: &Path) -> Result<(), MailboxError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MailboxError::io(path, e)),
        }
    }

    /// Newest image in `dir` by modification time.
    pub fn latest_image(&self, dir: &Path) -> Option<FileInfo> {
        let patterns: Vec<glob::Pattern> = IMAGE_PATTERNS
            .iter()
            .filter_map(|p| glob::Pattern::new(p).ok())
            .collect();

        let entries = fs::read_dir(dir).ok()?;
        let mut newest: Option<(SystemTime, PathBuf)> = None;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !patterns.iter().any(|p| p.matches(name)) {
                continue;
            }
            let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
                continue;
            };
            let path = entry.path();
            let replace = match &newest {
                None => true,
                Some((t, p)) => modified > *t || (modified == *t && path > *p),
            };
            if replace {
                newest = Some((modified, path));
            }
        }

        newest.map(|(modified, path)| FileInfo {
            path,
            age: SystemTime::now()
                .duration_since(modified)
                .unwrap_or_default(),
        })
    }
}

/// Write `bytes` to a hidden sibling of `path` and move it into place.
///
/// A missing parent directory is created and the write tried once more.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), MailboxError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = match partial_in(dir) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!(dir = %dir.display(), "recreating missing mailbox directory");
            fs::create_dir_all(dir).map_err(|e| MailboxError::io(dir, e))?;
            partial_in(dir)
        }
        other => other,
    }
    .map_err(|e| MailboxError::io(dir, e))?;
    tmp.write_all(bytes).map_err(|e| MailboxError::io(path, e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| MailboxError::io(path, e))?;
    tmp.persist(path)
        .map_err(|e| MailboxError::io(path, e.error))?;
    Ok(())
}

fn partial_in(dir: &Path) -> io::Result<tempfile::NamedTempFile> {
    tempfile::Builder::new()
        .prefix(".")
        .suffix(".partial")
        .tempfile_in(dir)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn mailbox() -> (tempfile::TempDir, Mailbox) {
        let dir = tempfile::tempdir().expect("tempdir");
        let mailbox = Mailbox::open(dir.path().join("data")).expect("open");
        (dir, mailbox)
    }

    #[test]
    fn test_open_creates_tree() {
        let (_dir, mailbox) = mailbox();
        assert!(mailbox.camera_dir().is_dir());
        assert!(mailbox.screenshots_dir().is_dir());
        assert!(mailbox.log_path().parent().unwrap().is_dir());
    }

    #[test]
    fn test_missing_document() {
        let (_dir, mailbox) = mailbox();
        let doc: Document<Value> = mailbox.read_json(&mailbox.status_path());
        assert!(matches!(doc, Document::Missing));
    }

    #[test]
    fn test_malformed_document() {
        let (_dir, mailbox) = mailbox();
        fs::write(mailbox.status_path(), b"{\"sequence\": 1,").unwrap();
        let doc: Document<Value> = mailbox.read_json(&mailbox.status_path());
        assert!(matches!(doc, Document::Malformed(_)));
        assert!(doc.into_option().is_none());
    }

    #[test]
    fn test_write_replaces_without_leftovers() {
        let (_dir, mailbox) = mailbox();
        let path = mailbox.status_path();
        mailbox.write_json(&path, &json!({"a": 1})).unwrap();
        mailbox.write_json(&path, &json!({"a": 2})).unwrap();

        let doc: Value = mailbox.read_json(&path).into_option().unwrap();
        assert_eq!(doc["a"], 2);

        let leftovers: Vec<_> = fs::read_dir(mailbox.root())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().ends_with(".partial"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_write_recreates_wiped_directory() {
        let (_dir, mailbox) = mailbox();
        fs::remove_dir_all(mailbox.root()).unwrap();

        mailbox.write_json(&mailbox.status_path(), &json!({"a": 1})).unwrap();
        let doc: Value = mailbox
            .read_json(&mailbox.status_path())
            .into_option()
            .unwrap();
        assert_eq!(doc["a"], 1);

        mailbox.ensure_tree().unwrap();
        assert!(mailbox.camera_dir().is_dir());
        assert!(mailbox.screenshots_dir().is_dir());
    }

    #[test]
    fn test_remove_missing_is_ok() {
        let (_dir, mailbox) = mailbox();
        mailbox.remove(&mailbox.commands_path()).unwrap();
    }

    #[test]
    fn test_latest_image_ignores_other_files() {
        let (_dir, mailbox) = mailbox();
        let camera = mailbox.camera_dir();
        assert!(mailbox.latest_image(&camera).is_none());

        fs::write(camera.join("notes.txt"), b"x").unwrap();
        fs::write(camera.join(".frame.partial"), b"x").unwrap();
        assert!(mailbox.latest_image(&camera).is_none());

        fs::write(camera.join("frame_00000001.png"), b"png").unwrap();
        let latest = mailbox.latest_image(&camera).unwrap();
        assert_eq!(latest.path.file_name().unwrap(), "frame_00000001.png");
    }
}
