//! Pluggable content storage. The filesystem backend is the reference implementation;
//! the trait exists so a future object-store backend can swap in without touching
//! any processor.

use async_trait::async_trait;
use backplane_common::{Error, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Normalizes a user-supplied clip label into a filesystem-safe directory name.
pub fn normalize_label(label: &str) -> String {
    let lowered = label.trim().to_lowercase();
    if lowered.is_empty() {
        return "unknown".to_string();
    }

    let mut out = String::with_capacity(lowered.len());
    for ch in lowered.chars() {
        match ch {
            ' ' => out.push('_'),
            '.' => out.push('_'),
            c if c.is_alphanumeric() || c == '_' || c == '-' => out.push(c),
            _ => out.push('-'),
        }
    }

    let trimmed = out.trim_matches(|c| c == '_' || c == '-').to_string();
    if trimmed.is_empty() {
        "unknown".to_string()
    } else {
        trimmed
    }
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn save(&self, data: &[u8], logical_path: &str) -> Result<String>;
    async fn load(&self, path: &str) -> Result<Vec<u8>>;
    async fn delete(&self, path: &str) -> Result<()>;
    async fn exists(&self, path: &str) -> Result<bool>;
    /// A backend-specific locator for `path` (a `file://` URL on the filesystem
    /// backend; an object-store backend would return a signed or public URL).
    fn get_url(&self, path: &str) -> String;

    async fn save_clip(&self, label: &str, filename: &str, data: &[u8]) -> Result<String>;
    async fn move_clip(&self, old_label: &str, new_label: &str, filename: &str) -> Result<()>;
    async fn delete_clip(&self, label: &str, filename: &str) -> Result<()>;
    fn get_clip_path(&self, label: &str, filename: &str) -> String;
    async fn list_clips_by_label(&self, label: &str) -> Result<Vec<String>>;
    async fn export_clip(&self, label: &str, filename: &str, export_dir: &Path) -> Result<String>;
}

/// Reference `BlobStore` backed by a directory tree on the local filesystem.
pub struct FilesystemBlobStore {
    root: PathBuf,
}

impl FilesystemBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, logical_path: &str) -> PathBuf {
        self.root.join(logical_path)
    }

    fn clip_relative_path(&self, label: &str, filename: &str) -> PathBuf {
        PathBuf::from(normalize_label(label)).join(filename)
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn save(&self, data: &[u8], logical_path: &str) -> Result<String> {
        let dest = self.resolve(logical_path);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }
        let mut file = fs::File::create(&dest).await?;
        file.write_all(data).await?;
        Ok(dest.display().to_string())
    }

    async fn load(&self, path: &str) -> Result<Vec<u8>> {
        fs::read(self.resolve(path)).await.map_err(Error::from)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        match fs::remove_file(self.resolve(path)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::from(e)),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(fs::metadata(self.resolve(path)).await.is_ok())
    }

    fn get_url(&self, path: &str) -> String {
        format!("file://{}", self.resolve(path).display())
    }

    async fn save_clip(&self, label: &str, filename: &str, data: &[u8]) -> Result<String> {
        let relative = self.clip_relative_path(label, filename);
        self.save(data, &relative.display().to_string()).await
    }

    async fn move_clip(&self, old_label: &str, new_label: &str, filename: &str) -> Result<()> {
        let old_path = self.resolve(&self.clip_relative_path(old_label, filename).display().to_string());
        let new_rel = self.clip_relative_path(new_label, filename);
        let new_path = self.resolve(&new_rel.display().to_string());

        if let Some(parent) = new_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        match fs::rename(&old_path, &new_path).await {
            Ok(()) => {}
            Err(_) => {
                let data = fs::read(&old_path).await?;
                fs::write(&new_path, &data).await?;
                fs::remove_file(&old_path).await?;
            }
        }

        let old_dir = self.root.join(normalize_label(old_label));
        let _ = fs::remove_dir(&old_dir).await;
        Ok(())
    }

    async fn delete_clip(&self, label: &str, filename: &str) -> Result<()> {
        let relative = self.clip_relative_path(label, filename);
        self.delete(&relative.display().to_string()).await?;

        let label_dir = self.root.join(normalize_label(label));
        let _ = fs::remove_dir(&label_dir).await;
        Ok(())
    }

    fn get_clip_path(&self, label: &str, filename: &str) -> String {
        self.clip_relative_path(label, filename).display().to_string()
    }

    async fn list_clips_by_label(&self, label: &str) -> Result<Vec<String>> {
        let dir = self.root.join(normalize_label(label));
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::from(e)),
        };

        let mut filenames = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    filenames.push(name.to_string());
                }
            }
        }
        filenames.sort();
        Ok(filenames)
    }

    async fn export_clip(&self, label: &str, filename: &str, export_dir: &Path) -> Result<String> {
        let normalized = normalize_label(label);
        let src = self.resolve(&self.clip_relative_path(label, filename).display().to_string());
        let dest_dir = export_dir.join(&normalized);
        fs::create_dir_all(&dest_dir).await?;
        let dest = dest_dir.join(filename);
        fs::copy(&src, &dest).await?;
        Ok(dest.display().to_string())
    }
}
