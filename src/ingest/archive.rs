//! Raw archive acquisition.
//!
//! The raw text file is downloaded as a zip archive only when it is not
//! already on disk. The zip itself is kept next to it when possible, and the
//! first `.txt` member is extracted through a temp file so an interrupted run
//! never leaves a truncated raw file behind.

use reqwest_middleware::ClientWithMiddleware;
use std::fs;
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{info, warn};
use zip::ZipArchive;

use super::http::{get_bytes, retrying_client};
use super::IngestError;

pub struct ArchiveFetcher {
    client: ClientWithMiddleware,
    url: String,
}

impl ArchiveFetcher {
    pub fn new(url: impl Into<String>, timeout: Duration, max_retries: u32) -> Result<Self, IngestError> {
        Ok(Self {
            client: retrying_client(timeout, max_retries)?,
            url: url.into(),
        })
    }

    /// Make sure `raw_path` exists, downloading and extracting the archive
    /// if needed. Returns the path for convenience.
    pub async fn ensure_raw_file(
        &self,
        raw_path: &Path,
        zip_path: &Path,
    ) -> Result<PathBuf, IngestError> {
        if raw_path.exists() {
            info!(path = %raw_path.display(), "raw power file already present");
            return Ok(raw_path.to_path_buf());
        }

        info!(url = %self.url, "downloading raw power archive");
        let bytes = get_bytes(&self.client, &self.url, &[]).await?;
        info!(bytes = bytes.len(), "archive downloaded");

        if let Err(e) = write_atomically(zip_path, &bytes) {
            warn!(path = %zip_path.display(), error = %e, "could not keep archive copy");
        }

        let member = extract_text_member(&bytes, raw_path)?;
        info!(member = %member, path = %raw_path.display(), "raw power file extracted");
        Ok(raw_path.to_path_buf())
    }
}

/// Extract the first `.txt` member of a zip archive to `dest`, returning the
/// member name.
pub fn extract_text_member(archive: &[u8], dest: &Path) -> Result<String, IngestError> {
    let mut zip = ZipArchive::new(Cursor::new(archive))?;

    let position = (0..zip.len())
        .find(|&i| {
            zip.by_index(i)
                .map(|file| file.name().to_ascii_lowercase().ends_with(".txt"))
                .unwrap_or(false)
        })
        .ok_or(IngestError::NoTextMember)?;

    let mut member = zip.by_index(position)?;
    let name = member.name().to_string();
    let dir = parent_dir(dest);
    fs::create_dir_all(dir).map_err(|source| IngestError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let io_err = |source: io::Error| IngestError::Io {
        path: dest.to_path_buf(),
        source,
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    io::copy(&mut member, &mut tmp).map_err(io_err)?;
    tmp.flush().map_err(io_err)?;
    tmp.persist(dest).map_err(|e| io_err(e.error))?;

    Ok(name)
}

fn write_atomically(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = parent_dir(path);
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zip::write::FileOptions;

    fn archive(members: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in members {
            writer
                .start_file(*name, FileOptions::default())
                .unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_extracts_text_member() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("data").join("power.txt");
        let bytes = archive(&[("readme.md", "ignore"), ("power.txt", "Date;Time\n")]);

        let name = extract_text_member(&bytes, &dest).unwrap();

        assert_eq!(name, "power.txt");
        assert_eq!(fs::read_to_string(&dest).unwrap(), "Date;Time\n");
    }

    #[test]
    fn test_archive_without_text_member() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = archive(&[("data.csv", "a,b\n")]);

        let err = extract_text_member(&bytes, &dir.path().join("x.txt")).unwrap_err();
        assert!(matches!(err, IngestError::NoTextMember));
    }

    #[test]
    fn test_rejects_non_zip_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let err = extract_text_member(b"not a zip", &dir.path().join("x.txt")).unwrap_err();
        assert!(matches!(err, IngestError::Zip(_)));
    }

    #[tokio::test]
    async fn test_existing_raw_file_skips_download() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("power.txt");
        fs::write(&raw, "Date;Time\n").unwrap();

        // Unroutable URL: any request would fail the test.
        let fetcher =
            ArchiveFetcher::new("http://127.0.0.1:9/none.zip", Duration::from_millis(200), 0)
                .unwrap();
        let path = fetcher
            .ensure_raw_file(&raw, &dir.path().join("power.zip"))
            .await
            .unwrap();
        assert_eq!(path, raw);
    }
}
