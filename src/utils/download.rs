//! On-disk cache for bulk catalog downloads (the CGI biomarker TSV).
//!
//! This is the only place evidence-adjacent bytes touch the filesystem.
//! Writers hold a process-wide mutex and publish with an atomic rename, so
//! readers always see either the previous complete copy or the new one.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::OncoTierError;

pub fn oncotier_cache_dir() -> PathBuf {
    match dirs::cache_dir() {
        Some(dir) => dir.join("oncotier"),
        None => std::env::temp_dir().join("oncotier"),
    }
}

pub fn cache_key(id: &str) -> String {
    format!("{:x}", md5::compute(id.as_bytes()))
}

pub fn catalog_path(id: &str) -> PathBuf {
    oncotier_cache_dir().join(format!("{}.tsv", cache_key(id)))
}

/// At most one catalog download runs at a time, process-wide.
pub fn download_mutex() -> &'static Mutex<()> {
    static DOWNLOAD_MUTEX: OnceLock<Mutex<()>> = OnceLock::new();
    DOWNLOAD_MUTEX.get_or_init(|| Mutex::new(()))
}

/// A cached copy counts as fresh while its mtime is younger than `ttl`.
pub async fn is_fresh(path: &PathBuf, ttl: Duration) -> bool {
    let Ok(meta) = tokio::fs::metadata(path).await else {
        return false;
    };
    let Ok(modified) = meta.modified() else {
        return false;
    };
    match SystemTime::now().duration_since(modified) {
        Ok(age) => age <= ttl,
        // mtime in the future: treat as fresh rather than re-downloading forever.
        Err(_) => true,
    }
}

/// Writes `content` to the cache path for `id` via a unique temporary file
/// and an atomic rename. Unlike an insert-once cache this always replaces,
/// since catalog refreshes must supersede stale copies.
pub async fn save_atomic(id: &str, content: &str) -> Result<PathBuf, OncoTierError> {
    let path = catalog_path(id);
    let Some(dir) = path.parent() else {
        return Err(OncoTierError::InvalidArgument(
            "Invalid cache path (no parent directory)".into(),
        ));
    };
    tokio::fs::create_dir_all(dir).await?;

    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();

    let mut opened = None;
    for attempt in 0..32_u32 {
        let candidate = dir.join(format!(
            ".{}.{}.{}.tmp",
            cache_key(id),
            std::process::id(),
            seed.saturating_add(attempt as u128)
        ));
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
        {
            Ok(file) => {
                opened = Some((candidate, file));
                break;
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err.into()),
        }
    }
    let Some((tmp_path, mut file)) = opened else {
        return Err(OncoTierError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "Unable to allocate temporary cache file",
        )));
    };

    file.write_all(content.as_bytes()).await?;
    file.flush().await?;
    drop(file);

    tokio::fs::rename(&tmp_path, &path).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_stable() {
        assert_eq!(cache_key("cgi-biomarkers"), cache_key("cgi-biomarkers"));
        assert_ne!(cache_key("cgi-biomarkers"), cache_key("other"));
    }

    #[tokio::test]
    async fn save_atomic_replaces_previous_copy() {
        let id = format!("test-catalog-{}", std::process::id());
        let first = save_atomic(&id, "gene\tvariant\nBRAF\tV600E\n")
            .await
            .expect("first write");
        let second = save_atomic(&id, "gene\tvariant\nKRAS\tG12C\n")
            .await
            .expect("replace write");
        assert_eq!(first, second);

        let content = tokio::fs::read_to_string(&second).await.unwrap();
        assert!(content.contains("KRAS"));
        assert!(!content.contains("BRAF"));

        tokio::fs::remove_file(second).await.ok();
    }

    #[tokio::test]
    async fn missing_file_is_never_fresh() {
        let path = oncotier_cache_dir().join("does-not-exist.tsv");
        assert!(!is_fresh(&path, Duration::from_secs(3600)).await);
    }
}
