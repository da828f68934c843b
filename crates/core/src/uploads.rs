//! Directory-backed store for uploaded recordings.

use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const LOG_TARGET: &str = "uploads";
const AUDIO_EXTENSIONS: &[&str] = &["wav", "mp3"];

#[derive(thiserror::Error, Debug)]
pub enum UploadError {
    #[error("upload io error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid upload name: {0:?}")]
    InvalidName(String),
    #[error("no such upload: {0}")]
    NotFound(String),
    #[error("no audio has been uploaded")]
    NoAudio,
}

pub type Result<T> = std::result::Result<T, UploadError>;

#[derive(Clone, Debug)]
pub struct UploadDir {
    root: PathBuf,
}

impl UploadDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stores `bytes` under a sanitised version of `name`, replacing any
    /// existing file, and returns the stored name.
    pub async fn save(&self, name: &str, bytes: &[u8]) -> Result<String> {
        let stored = sanitize_filename(name)?;
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::write(self.root.join(&stored), bytes).await?;
        tracing::info!(target: LOG_TARGET, file = %stored, bytes = bytes.len(), "upload saved");
        Ok(stored)
    }

    pub async fn resolve(&self, name: &str) -> Result<PathBuf> {
        let stored = sanitize_filename(name)?;
        let path = self.root.join(&stored);
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            Ok(_) => Err(UploadError::NotFound(stored)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(UploadError::NotFound(stored)),
            Err(e) => Err(e.into()),
        }
    }

    /// Most recently modified audio file, if any.
    pub async fn latest(&self) -> Result<Option<PathBuf>> {
        let mut newest: Option<(SystemTime, PathBuf)> = None;
        for path in self.audio_files().await? {
            let modified = tokio::fs::metadata(&path).await?.modified()?;
            if newest.as_ref().map_or(true, |(t, _)| modified > *t) {
                newest = Some((modified, path));
            }
        }
        Ok(newest.map(|(_, path)| path))
    }

    /// Deletes every audio file and returns how many went away. Failures on
    /// individual files are logged and skipped.
    pub async fn clear(&self) -> Result<usize> {
        let mut deleted = 0;
        for path in self.audio_files().await? {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => deleted += 1,
                Err(e) => {
                    tracing::warn!(target: LOG_TARGET, path = %path.display(), error = %e, "could not delete upload")
                }
            }
        }
        tracing::info!(target: LOG_TARGET, deleted, "uploads cleared");
        Ok(deleted)
    }

    async fn audio_files(&self) -> Result<Vec<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_file() && is_audio(&path) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

fn is_audio(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| AUDIO_EXTENSIONS.iter().any(|a| a.eq_ignore_ascii_case(e)))
}

/// Keeps the final path component, maps spaces to `_`, drops everything
/// outside `[A-Za-z0-9._-]` and any leading dots.
pub fn sanitize_filename(name: &str) -> Result<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .filter_map(|c| match c {
            ' ' => Some('_'),
            c if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') => Some(c),
            _ => None,
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        return Err(UploadError::InvalidName(name.to_owned()));
    }
    Ok(cleaned.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn sanitize_strips_paths_and_odd_characters() {
        assert_eq!(sanitize_filename("clip.wav").unwrap(), "clip.wav");
        assert_eq!(sanitize_filename("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_filename("C:\\temp\\my talk.mp3").unwrap(), "my_talk.mp3");
        assert_eq!(sanitize_filename("..hidden.wav").unwrap(), "hidden.wav");
        assert_eq!(sanitize_filename("voix*é?.wav").unwrap(), "voix.wav");
    }

    #[test]
    fn sanitize_rejects_names_that_vanish() {
        for name in ["", "..", "/", "???", "dir/"] {
            assert!(
                matches!(sanitize_filename(name), Err(UploadError::InvalidName(_))),
                "{name:?}"
            );
        }
    }

    #[tokio::test]
    async fn save_then_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadDir::new(dir.path().join("uploads"));

        let stored = store.save("my clip.wav", b"RIFF").await.unwrap();
        assert_eq!(stored, "my_clip.wav");
        let path = store.resolve("my clip.wav").await.unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"RIFF");

        assert!(matches!(
            store.resolve("other.wav").await,
            Err(UploadError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn latest_picks_newest_audio_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadDir::new(dir.path());
        assert_eq!(store.latest().await.unwrap(), None);

        store.save("old.wav", b"a").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.save("new.mp3", b"b").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.save("notes.txt", b"c").await.unwrap();

        let latest = store.latest().await.unwrap().unwrap();
        assert_eq!(latest.file_name().unwrap(), "new.mp3");
    }

    #[tokio::test]
    async fn clear_removes_only_audio() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadDir::new(dir.path());
        store.save("a.wav", b"a").await.unwrap();
        store.save("b.MP3", b"b").await.unwrap();
        store.save("keep.txt", b"c").await.unwrap();

        assert_eq!(store.clear().await.unwrap(), 2);
        assert_eq!(store.latest().await.unwrap(), None);
        assert!(dir.path().join("keep.txt").exists());
        assert_eq!(store.clear().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadDir::new(dir.path().join("never-created"));
        assert_eq!(store.latest().await.unwrap(), None);
        assert_eq!(store.clear().await.unwrap(), 0);
    }
}
