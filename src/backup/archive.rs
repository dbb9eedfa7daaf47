//! Zip packing and unpacking of backup staging directories.

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;

/// Zip every regular file directly inside `source_dir` into `archive_path`.
/// Returns the archive size in bytes.
pub fn pack_dir(source_dir: &Path, archive_path: &Path) -> Result<u64> {
    let file = File::create(archive_path)
        .with_context(|| format!("Failed to create archive {}", archive_path.display()))?;
    let mut writer = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    let mut entries: Vec<PathBuf> = std::fs::read_dir(source_dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    entries.sort();

    for path in entries {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        writer.start_file(name, options)?;
        let mut content = Vec::new();
        File::open(&path)?.read_to_end(&mut content)?;
        writer.write_all(&content)?;
    }
    writer.finish()?;

    Ok(std::fs::metadata(archive_path)?.len())
}

/// Read every `<name>.json` entry of an archive. Entries with a directory
/// component or another extension are ignored.
pub fn read_json_entries(archive_path: &Path) -> Result<Vec<(String, Vec<u8>)>> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open archive {}", archive_path.display()))?;
    let mut archive = zip::ZipArchive::new(file)?;
    let mut entries = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        if name.contains('/') || name.contains('\\') || name.starts_with('.') {
            continue;
        }
        let Some(stem) = name.strip_suffix(".json") else {
            continue;
        };
        let mut content = Vec::new();
        entry.read_to_end(&mut content)?;
        entries.push((stem.to_string(), content));
    }
    if entries.is_empty() {
        bail!("Archive {} contains no collection files", archive_path.display());
    }
    Ok(entries)
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_pack_and_read_back() {
        let temp_dir = TempDir::new().unwrap();
        let staging = temp_dir.path().join("staging");
        std::fs::create_dir(&staging).unwrap();
        std::fs::write(staging.join("users.json"), b"[{\"id\":\"u1\"}]").unwrap();
        std::fs::write(staging.join("notes.txt"), b"ignored on read").unwrap();

        let archive = temp_dir.path().join("backup.zip");
        let size = pack_dir(&staging, &archive).unwrap();
        assert!(size > 0);

        let entries = read_json_entries(&archive).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "users");
        assert_eq!(entries[0].1, b"[{\"id\":\"u1\"}]");
    }

    #[test]
    fn test_sha256_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("f");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
