//! Local filesystem backend.
//!
//! Objects live under `<root>/<bucket>/<path>`. Bucket and path
//! components are validated before any filesystem call; traversal
//! segments never reach the OS.

use crate::{ObjectMeta, StorageBackend};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fluxbase_core::Error;
use std::path::{Path, PathBuf};

pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalBackend { root: root.into() }
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf, Error> {
        validate_segment(bucket)?;
        Ok(self.root.join(bucket))
    }

    fn object_path(&self, bucket: &str, path: &str) -> Result<PathBuf, Error> {
        let mut full = self.bucket_dir(bucket)?;
        if path.is_empty() {
            return Err(Error::BadRequest("empty object path".into()));
        }
        for segment in path.split('/') {
            validate_segment(segment)?;
            full.push(segment);
        }
        Ok(full)
    }
}

fn validate_segment(segment: &str) -> Result<(), Error> {
    if segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment.contains(['\\', '\0'])
    {
        return Err(Error::BadRequest(format!("invalid path segment: {segment:?}")));
    }
    Ok(())
}

async fn meta_for(path: &Path, object_path: String) -> Result<ObjectMeta, Error> {
    let metadata = tokio::fs::metadata(path).await.map_err(Error::internal)?;
    let modified_at = metadata
        .modified()
        .ok()
        .map(DateTime::<Utc>::from);
    Ok(ObjectMeta {
        content_type: mime_guess::from_path(&object_path)
            .first()
            .map(|m| m.to_string()),
        path: object_path,
        size: metadata.len(),
        modified_at,
    })
}

#[async_trait]
impl StorageBackend for LocalBackend {
    async fn put(&self, bucket: &str, path: &str, data: Vec<u8>) -> Result<ObjectMeta, Error> {
        let full = self.object_path(bucket, path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(Error::internal)?;
        }
        tokio::fs::write(&full, &data)
            .await
            .map_err(Error::internal)?;
        meta_for(&full, path.to_string()).await
    }

    async fn get(&self, bucket: &str, path: &str) -> Result<(Vec<u8>, ObjectMeta), Error> {
        let full = self.object_path(bucket, path)?;
        let data = match tokio::fs::read(&full).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("no such object: {bucket}/{path}")));
            }
            Err(e) => return Err(Error::internal(e)),
        };
        let meta = meta_for(&full, path.to_string()).await?;
        Ok((data, meta))
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<ObjectMeta>, Error> {
        let dir = self.bucket_dir(bucket)?;
        let mut paths = Vec::new();
        collect_files(&dir, &dir, &mut paths).await?;
        paths.sort();

        let mut out = Vec::new();
        for object_path in paths
            .into_iter()
            .filter(|p| p.starts_with(prefix))
            .skip(offset as usize)
            .take(limit as usize)
        {
            let full = self.object_path(bucket, &object_path)?;
            out.push(meta_for(&full, object_path).await?);
        }
        Ok(out)
    }

    async fn delete(&self, bucket: &str, path: &str) -> Result<(), Error> {
        let full = self.object_path(bucket, path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("no such object: {bucket}/{path}")))
            }
            Err(e) => Err(Error::internal(e)),
        }
    }

    async fn delete_bucket(&self, bucket: &str) -> Result<(), Error> {
        let dir = self.bucket_dir(bucket)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::internal(e)),
        }
    }
}

/// Depth-first walk collecting bucket-relative file paths.
async fn collect_files(
    base: &Path,
    dir: &Path,
    out: &mut Vec<String>,
) -> Result<(), Error> {
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let mut entries = match tokio::fs::read_dir(&current).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(Error::internal(e)),
        };
        while let Some(entry) = entries.next_entry().await.map_err(Error::internal)? {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if let Ok(relative) = path.strip_prefix(base) {
                out.push(relative.to_string_lossy().replace('\\', "/"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> (tempfile::TempDir, LocalBackend) {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::new(dir.path());
        (dir, backend)
    }

    #[tokio::test]
    async fn put_get_delete_round_trip() {
        let (_dir, backend) = backend();
        let meta = backend
            .put("avatars", "users/1/photo.png", b"png-bytes".to_vec())
            .await
            .unwrap();
        assert_eq!(meta.size, 9);
        assert_eq!(meta.content_type.as_deref(), Some("image/png"));

        let (data, meta) = backend.get("avatars", "users/1/photo.png").await.unwrap();
        assert_eq!(data, b"png-bytes");
        assert_eq!(meta.path, "users/1/photo.png");

        backend.delete("avatars", "users/1/photo.png").await.unwrap();
        assert!(backend.get("avatars", "users/1/photo.png").await.is_err());
    }

    #[tokio::test]
    async fn list_respects_prefix_and_pagination() {
        let (_dir, backend) = backend();
        for name in ["a/1.txt", "a/2.txt", "b/3.txt"] {
            backend.put("docs", name, b"x".to_vec()).await.unwrap();
        }

        let all = backend.list("docs", "", 10, 0).await.unwrap();
        assert_eq!(all.len(), 3);

        let under_a = backend.list("docs", "a/", 10, 0).await.unwrap();
        assert_eq!(under_a.len(), 2);

        let paged = backend.list("docs", "", 1, 1).await.unwrap();
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].path, "a/2.txt");
    }

    #[tokio::test]
    async fn traversal_segments_are_rejected() {
        let (_dir, backend) = backend();
        for bad in ["../escape", "a/../../etc/passwd", "a//b", "."] {
            assert!(
                backend.put("docs", bad, b"x".to_vec()).await.is_err(),
                "{bad:?} should be rejected"
            );
        }
        assert!(backend.put("..", "x", b"x".to_vec()).await.is_err());
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let (_dir, backend) = backend();
        let err = backend.get("docs", "nope.txt").await.unwrap_err();
        assert_eq!(err.kind(), fluxbase_core::ErrorKind::NotFound);
    }
}
