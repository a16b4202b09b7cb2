//! On-disk retriever cache.
//!
//! Four files, present together or not at all:
//! `documents.json`, `model_name.txt`, `index.faiss`, `embeddings.npy`.
//!
//! `index.faiss` layout (little endian):
//! magic `ICDFLAT\0` | version u32 | metric u32 (1 = L2) | dimension u64 |
//! count u64 | SHA-256 of the corpus (32 bytes) | count × dimension f32.

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::index::FlatL2Index;
use super::RetrievalError;
use crate::config::{DOCUMENTS_FILE, EMBEDDINGS_FILE, INDEX_FILE, MODEL_NAME_FILE};
use crate::models::CodedEntry;

const INDEX_MAGIC: &[u8; 8] = b"ICDFLAT\0";
const INDEX_VERSION: u32 = 1;
const METRIC_L2: u32 = 1;
const INDEX_HEADER_LEN: usize = 8 + 4 + 4 + 8 + 8 + 32;

const NPY_MAGIC: &[u8; 6] = b"\x93NUMPY";
/// NumPy pads the preamble plus header to a multiple of this.
const NPY_ALIGN: usize = 64;

pub const CACHE_FILES: [&str; 4] = [DOCUMENTS_FILE, MODEL_NAME_FILE, INDEX_FILE, EMBEDDINGS_FILE];

/// Whether every cache file exists in `dir`.
pub fn cache_complete(dir: &Path) -> bool {
    CACHE_FILES.iter().all(|f| dir.join(f).is_file())
}

// ── Corpus digest ──────────────────────────────────────────

/// SHA-256 over the ordered corpus. Binds an index file to its documents.
pub fn corpus_digest(entries: &[CodedEntry]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for entry in entries {
        hasher.update(entry.code.as_bytes());
        hasher.update([0x1f]);
        hasher.update(entry.description.as_bytes());
        hasher.update([0x1f, entry.billable as u8, 0x1e]);
    }
    hasher.finalize().into()
}

pub fn digest_hex(digest: &[u8; 32]) -> String {
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

// ── NumPy .npy (v1.0, <f4, C order, 2-D) ───────────────────

pub fn write_npy(path: &Path, rows: usize, cols: usize, data: &[f32]) -> Result<(), RetrievalError> {
    if rows * cols != data.len() {
        return Err(RetrievalError::DimensionMismatch {
            expected: rows * cols,
            actual: data.len(),
        });
    }

    let mut header = format!("{{'descr': '<f4', 'fortran_order': False, 'shape': ({rows}, {cols}), }}");
    // magic(6) + version(2) + header_len(2) + header + '\n'
    let unpadded = NPY_MAGIC.len() + 2 + 2 + header.len() + 1;
    let padding = (NPY_ALIGN - unpadded % NPY_ALIGN) % NPY_ALIGN;
    header.push_str(&" ".repeat(padding));
    header.push('\n');

    let header_len = u16::try_from(header.len())
        .map_err(|_| RetrievalError::CorruptCache("npy header too long".into()))?;

    let mut out = BufWriter::new(fs::File::create(path)?);
    out.write_all(NPY_MAGIC)?;
    out.write_all(&[1, 0])?;
    out.write_all(&header_len.to_le_bytes())?;
    out.write_all(header.as_bytes())?;
    for value in data {
        out.write_all(&value.to_le_bytes())?;
    }
    out.flush()?;
    Ok(())
}

/// Returns `(rows, cols, row-major data)`.
pub fn read_npy(path: &Path) -> Result<(usize, usize, Vec<f32>), RetrievalError> {
    static DESCR: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"'descr'\s*:\s*'([^']*)'").unwrap());
    static FORTRAN: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"'fortran_order'\s*:\s*(True|False)").unwrap());
    static SHAPE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"'shape'\s*:\s*\(\s*(\d+)\s*,\s*(\d+)\s*,?\s*\)").unwrap());

    let corrupt = |msg: &str| RetrievalError::CorruptCache(format!("{}: {msg}", path.display()));

    let bytes = fs::read(path)?;
    if bytes.len() < 10 || &bytes[..6] != NPY_MAGIC {
        return Err(corrupt("not a .npy file"));
    }
    if bytes[6] != 1 {
        return Err(corrupt("unsupported .npy version"));
    }
    let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
    let data_start = 10 + header_len;
    let header = bytes
        .get(10..data_start)
        .and_then(|h| std::str::from_utf8(h).ok())
        .ok_or_else(|| corrupt("truncated header"))?;

    let descr = DESCR
        .captures(header)
        .map(|c| c[1].to_string())
        .ok_or_else(|| corrupt("missing descr"))?;
    if descr != "<f4" {
        return Err(corrupt(&format!("expected <f4, found {descr}")));
    }
    if FORTRAN.captures(header).map(|c| &c[1] == "True").unwrap_or(true) {
        return Err(corrupt("expected C order"));
    }
    let shape = SHAPE.captures(header).ok_or_else(|| corrupt("expected 2-D shape"))?;
    let rows: usize = shape[1].parse().map_err(|_| corrupt("bad shape"))?;
    let cols: usize = shape[2].parse().map_err(|_| corrupt("bad shape"))?;

    let expected = rows
        .checked_mul(cols)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| corrupt(&format!("shape ({rows}, {cols}) is too large")))?;
    let payload = &bytes[data_start..];
    if payload.len() != expected {
        return Err(corrupt(&format!(
            "expected {expected} data bytes, found {}",
            payload.len()
        )));
    }
    let data = payload
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Ok((rows, cols, data))
}

// ── Index file ─────────────────────────────────────────────

pub fn write_index(path: &Path, index: &FlatL2Index, digest: &[u8; 32]) -> Result<(), RetrievalError> {
    let mut out = BufWriter::new(fs::File::create(path)?);
    out.write_all(INDEX_MAGIC)?;
    out.write_all(&INDEX_VERSION.to_le_bytes())?;
    out.write_all(&METRIC_L2.to_le_bytes())?;
    out.write_all(&(index.dimension() as u64).to_le_bytes())?;
    out.write_all(&(index.len() as u64).to_le_bytes())?;
    out.write_all(digest)?;
    for value in index.as_flat() {
        out.write_all(&value.to_le_bytes())?;
    }
    out.flush()?;
    Ok(())
}

/// Returns the index and the corpus digest recorded with it.
pub fn read_index(path: &Path) -> Result<(FlatL2Index, [u8; 32]), RetrievalError> {
    let corrupt = |msg: String| RetrievalError::CorruptCache(format!("{}: {msg}", path.display()));

    let bytes = fs::read(path)?;
    if bytes.len() < INDEX_HEADER_LEN || &bytes[..8] != INDEX_MAGIC {
        return Err(corrupt("not an index file".into()));
    }
    let u32_at = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
    let u64_at = |at: usize| {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[at..at + 8]);
        u64::from_le_bytes(raw)
    };

    let version = u32_at(8);
    if version != INDEX_VERSION {
        return Err(corrupt(format!("unsupported index version {version}")));
    }
    let metric = u32_at(12);
    if metric != METRIC_L2 {
        return Err(corrupt(format!("index metric {metric} is not L2")));
    }
    let dimension = usize::try_from(u64_at(16)).map_err(|_| corrupt("dimension overflows".into()))?;
    let count = usize::try_from(u64_at(24)).map_err(|_| corrupt("count overflows".into()))?;
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&bytes[32..64]);

    let expected = count
        .checked_mul(dimension)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| corrupt(format!("header declares {count}x{dimension} vectors")))?;
    let payload = &bytes[INDEX_HEADER_LEN..];
    if payload.len() != expected {
        return Err(corrupt(format!(
            "header declares {count}x{dimension} vectors, payload has {} bytes",
            payload.len()
        )));
    }
    let data = payload
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();

    Ok((FlatL2Index::from_flat(dimension, data)?, digest))
}

// ── Atomic directory replacement ───────────────────────────

/// Write a directory's contents into a sibling staging directory, then swap
/// it into `target`. Readers see either the old set, no set, or the new set.
pub fn stage_and_swap<F>(target: &Path, write: F) -> Result<(), RetrievalError>
where
    F: FnOnce(&Path) -> Result<(), RetrievalError>,
{
    let (parent, name) = split_target(target)?;
    fs::create_dir_all(&parent)?;

    let staging = parent.join(format!(".{name}.staging-{}", Uuid::new_v4()));
    fs::create_dir(&staging)?;
    if let Err(e) = write(&staging) {
        let _ = fs::remove_dir_all(&staging);
        return Err(e);
    }

    let retired = if target.exists() {
        let old = parent.join(format!(".{name}.old-{}", Uuid::new_v4()));
        fs::rename(target, &old)?;
        Some(old)
    } else {
        None
    };

    if let Err(e) = fs::rename(&staging, target) {
        if let Some(old) = &retired {
            let _ = fs::rename(old, target);
        }
        let _ = fs::remove_dir_all(&staging);
        return Err(e.into());
    }

    if let Some(old) = retired {
        if let Err(e) = fs::remove_dir_all(&old) {
            tracing::warn!(path = %old.display(), "Failed to remove retired cache: {e}");
        }
    }
    Ok(())
}

/// Remove staging or retired siblings left behind by an interrupted save.
pub fn cleanup_orphaned_staging(target: &Path) -> usize {
    let Ok((parent, name)) = split_target(target) else {
        return 0;
    };
    let Ok(entries) = fs::read_dir(&parent) else {
        return 0;
    };

    let staging_prefix = format!(".{name}.staging-");
    let retired_prefix = format!(".{name}.old-");
    let mut cleaned = 0;
    for entry in entries.flatten() {
        let file_name = entry.file_name().to_string_lossy().to_string();
        if !(file_name.starts_with(&staging_prefix) || file_name.starts_with(&retired_prefix)) {
            continue;
        }
        match fs::remove_dir_all(entry.path()) {
            Ok(()) => cleaned += 1,
            Err(e) => tracing::warn!("Failed to clean orphaned cache staging: {e}"),
        }
    }

    if cleaned > 0 {
        tracing::info!(dirs_cleaned = cleaned, "Cleaned orphaned cache staging from previous run");
    }
    cleaned
}

fn split_target(target: &Path) -> Result<(PathBuf, String), RetrievalError> {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| RetrievalError::CorruptCache(format!("bad cache path {}", target.display())))?;
    let parent = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok((parent, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn npy_header_is_aligned_and_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.npy");
        let data: Vec<f32> = (0..6).map(|i| i as f32 * 0.5).collect();
        write_npy(&path, 2, 3, &data).unwrap();

        let bytes = fs::read(&path).unwrap();
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        assert_eq!((10 + header_len) % NPY_ALIGN, 0);
        assert_eq!(bytes[10 + header_len - 1], b'\n');

        let (rows, cols, back) = read_npy(&path).unwrap();
        assert_eq!((rows, cols), (2, 3));
        assert_eq!(back, data);
    }

    #[test]
    fn npy_rejects_other_dtypes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f8.npy");
        let header = "{'descr': '<f8', 'fortran_order': False, 'shape': (1, 1), }\n";
        let mut bytes = NPY_MAGIC.to_vec();
        bytes.extend_from_slice(&[1, 0]);
        bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(&1.0f64.to_le_bytes());
        fs::write(&path, bytes).unwrap();

        assert!(matches!(read_npy(&path), Err(RetrievalError::CorruptCache(_))));
    }

    #[test]
    fn npy_oversized_shape_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.npy");
        let header = "{'descr': '<f4', 'fortran_order': False, 'shape': (4611686018427387904, 8), }\n";
        let mut bytes = NPY_MAGIC.to_vec();
        bytes.extend_from_slice(&[1, 0]);
        bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(&1.0f32.to_le_bytes());
        fs::write(&path, bytes).unwrap();

        assert!(matches!(read_npy(&path), Err(RetrievalError::CorruptCache(_))));
    }

    #[test]
    fn index_oversized_header_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.faiss");
        let mut index = FlatL2Index::new(2);
        index.add(&[1.0, 2.0]).unwrap();
        write_index(&path, &index, &[0u8; 32]).unwrap();

        let mut bytes = fs::read(&path).unwrap();
        bytes[16..24].copy_from_slice(&u64::MAX.to_le_bytes());
        bytes[24..32].copy_from_slice(&(1u64 << 62).to_le_bytes());
        fs::write(&path, bytes).unwrap();

        assert!(matches!(read_index(&path), Err(RetrievalError::CorruptCache(_))));
    }

    #[test]
    fn npy_truncated_payload_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.npy");
        write_npy(&path, 2, 2, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let mut bytes = fs::read(&path).unwrap();
        bytes.truncate(bytes.len() - 4);
        fs::write(&path, bytes).unwrap();
        assert!(matches!(read_npy(&path), Err(RetrievalError::CorruptCache(_))));
    }

    #[test]
    fn index_file_keeps_vectors_and_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(INDEX_FILE);
        let index = FlatL2Index::from_flat(2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let digest = corpus_digest(&[CodedEntry::new("I10", "Hypertension", true)]);

        write_index(&path, &index, &digest).unwrap();
        let (loaded, loaded_digest) = read_index(&path).unwrap();
        assert_eq!(loaded, index);
        assert_eq!(loaded_digest, digest);
    }

    #[test]
    fn index_file_with_wrong_magic_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(INDEX_FILE);
        fs::write(&path, vec![0u8; 80]).unwrap();
        assert!(matches!(read_index(&path), Err(RetrievalError::CorruptCache(_))));
    }

    #[test]
    fn digest_depends_on_order_and_flags() {
        let a = CodedEntry::new("A00", "Cholera", false);
        let b = CodedEntry::new("I10", "Hypertension", true);
        let base = corpus_digest(&[a.clone(), b.clone()]);
        assert_ne!(base, corpus_digest(&[b.clone(), a.clone()]));
        let flipped = CodedEntry::new("A00", "Cholera", true);
        assert_ne!(base, corpus_digest(&[flipped, b]));
        assert_eq!(digest_hex(&base).len(), 64);
    }

    #[test]
    fn stage_and_swap_replaces_whole_directory() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("index");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("stale.txt"), "old").unwrap();

        stage_and_swap(&target, |dir| {
            fs::write(dir.join("fresh.txt"), "new")?;
            Ok(())
        })
        .unwrap();

        assert!(target.join("fresh.txt").exists());
        assert!(!target.join("stale.txt").exists());
        let leftovers = fs::read_dir(root.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn failed_write_leaves_previous_set() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("index");
        fs::create_dir(&target).unwrap();
        fs::write(target.join("kept.txt"), "old").unwrap();

        let result = stage_and_swap(&target, |_| Err(RetrievalError::EmptyCorpus));
        assert!(result.is_err());
        assert!(target.join("kept.txt").exists());
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 1);
    }

    #[test]
    fn orphaned_staging_is_cleaned() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("index");
        fs::create_dir_all(root.path().join(".index.staging-abc")).unwrap();
        fs::create_dir_all(root.path().join(".index.old-def")).unwrap();
        fs::create_dir_all(root.path().join("unrelated")).unwrap();

        assert_eq!(cleanup_orphaned_staging(&target), 2);
        assert!(root.path().join("unrelated").exists());
    }

    #[test]
    fn cache_complete_requires_all_files() {
        let dir = tempfile::tempdir().unwrap();
        for f in &CACHE_FILES[..3] {
            fs::write(dir.path().join(f), "x").unwrap();
        }
        assert!(!cache_complete(dir.path()));
        fs::write(dir.path().join(CACHE_FILES[3]), "x").unwrap();
        assert!(cache_complete(dir.path()));
    }
}
