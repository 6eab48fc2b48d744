use std::ffi::OsString;
use std::fs::File;
use std::fs::OpenOptions;
use std::io::Read;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use super::RecordMetadata;
use super::SearchHit;
use crate::error::IndexError;
use crate::error::Result;
use crate::knn::rank_cosine;
use crate::knn::top_k_cosine;

const MAX_RETRIES: usize = 10;
const RETRY_MS: u64 = 100;

#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

/// In-memory, append-only collection of embeddings and their metadata.
///
/// `vectors[i]` and `metadata[i]` always describe the same record. The store
/// does not check that embeddings share a length on insert; a mismatch
/// surfaces as [`IndexError::DimensionMismatch`] from [`Self::similarity`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorStore {
    vectors: Vec<Vec<f32>>,
    metadata: Vec<RecordMetadata>,
}

/// On-disk shape: two parallel sequences.
#[derive(Serialize)]
struct PersistedRef<'a> {
    vectors: &'a [Vec<f32>],
    metadata: &'a [RecordMetadata],
}

/// Both keys are required; any other JSON object is not a vector file.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Persisted {
    vectors: Vec<Vec<f32>>,
    metadata: Vec<RecordMetadata>,
}

impl VectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, embedding: Vec<f32>, metadata: RecordMetadata) {
        self.vectors.push(embedding);
        self.metadata.push(metadata);
    }

    pub fn count(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Length of the first stored embedding, `None` while empty.
    pub fn dim(&self) -> Option<usize> {
        self.vectors.first().map(Vec::len)
    }

    /// Walk all records in insertion order. Every call starts from the first
    /// record again.
    pub fn all(&self) -> Records<'_> {
        Records { inner: self.vectors.iter().zip(self.metadata.iter()) }
    }

    /// Index of the first record carrying `image_id`.
    pub fn position(&self, image_id: &str) -> Option<usize> {
        self.metadata.iter().position(|m| m.image_id == image_id)
    }

    /// Overwrite the record at `index` in place, keeping its slot in the
    /// insertion order. Returns false when `index` is out of range.
    pub fn replace(&mut self, index: usize, embedding: Vec<f32>, metadata: RecordMetadata) -> bool {
        match (self.vectors.get_mut(index), self.metadata.get_mut(index)) {
            (Some(v), Some(m)) => {
                *v = embedding;
                *m = metadata;
                true
            }
            _ => false,
        }
    }

    /// Score `query` against every record, highest cosine similarity first.
    /// Ties keep insertion order.
    pub fn similarity(&self, query: &[f32]) -> Result<Vec<SearchHit>> {
        let ranked = rank_cosine(&self.vectors, query)?;
        Ok(ranked
            .into_iter()
            .map(|s| SearchHit { score: s.score, metadata: self.metadata[s.idx].clone() })
            .collect())
    }

    /// The `top_k` best hits from [`Self::similarity`].
    pub fn top_k(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchHit>> {
        let ranked = top_k_cosine(&self.vectors, query, top_k)?;
        Ok(ranked
            .into_iter()
            .map(|s| SearchHit { score: s.score, metadata: self.metadata[s.idx].clone() })
            .collect())
    }

    /// Write every record to `path`, replacing whatever was there.
    ///
    /// Data goes to a sibling `.tmp` file first and is renamed over `path`,
    /// so a reader sees either the old file or the new one. An exclusive lock
    /// on the sibling `.lock` file is held for the whole write, so concurrent
    /// savers take turns and [`Self::load`] waits for a rename in progress.
    ///
    /// JSON has no encoding for NaN or infinity, so a store holding such a
    /// component is refused with [`IndexError::NonFinite`] before anything is
    /// written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(record) = self.vectors.iter().position(|v| v.iter().any(|x| !x.is_finite())) {
            return Err(IndexError::NonFinite { record });
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp_path = sibling_path(path, ".tmp")?;

        let bytes = serde_json::to_vec(&PersistedRef { vectors: &self.vectors, metadata: &self.metadata })
            .map_err(IndexError::Serialize)?;

        let lock = open_lock_file(path)?;
        lock_exclusive_with_retry(&lock)?;

        let mut opts = OpenOptions::new();
        opts.create(true).write(true).truncate(true);
        #[cfg(unix)]
        { opts.mode(0o600); }
        let mut out = opts.open(&tmp_path)?;
        ensure_owner_only_permissions(&out)?;
        out.write_all(&bytes)?;
        out.flush()?;
        out.sync_all()?;
        drop(out);

        std::fs::rename(&tmp_path, path)?;
        drop(lock);
        debug!(path = %path.display(), records = self.count(), "saved vector store");
        Ok(())
    }

    /// Read a store previously written by [`Self::save`].
    ///
    /// A missing file is an empty store. Anything that does not decode, or
    /// whose two sequences differ in length, is [`IndexError::Malformed`].
    pub fn load(path: &Path) -> Result<Self> {
        let mut file = match OpenOptions::new().read(true).open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no vector file yet; starting empty");
                return Ok(Self::new());
            }
            Err(e) => return Err(e.into()),
        };
        let lock = open_lock_file(path)?;
        lock_shared_with_retry(&lock)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        drop(lock);

        let data: Persisted = serde_json::from_slice(&buf).map_err(|e| IndexError::Malformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if data.vectors.len() != data.metadata.len() {
            return Err(IndexError::Malformed {
                path: path.to_path_buf(),
                reason: format!(
                    "{} vectors but {} metadata entries",
                    data.vectors.len(),
                    data.metadata.len()
                ),
            });
        }
        debug!(path = %path.display(), records = data.vectors.len(), "loaded vector store");
        Ok(Self { vectors: data.vectors, metadata: data.metadata })
    }
}

/// Iterator returned by [`VectorStore::all`].
pub struct Records<'a> {
    inner: std::iter::Zip<std::slice::Iter<'a, Vec<f32>>, std::slice::Iter<'a, RecordMetadata>>,
}

impl<'a> Iterator for Records<'a> {
    type Item = (&'a [f32], &'a RecordMetadata);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(v, m)| (v.as_slice(), m))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Records<'_> {}

fn sibling_path(path: &Path, suffix: &str) -> Result<PathBuf> {
    let Some(name) = path.file_name() else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("vector store path has no file name: {}", path.display()),
        )
        .into());
    };
    let mut tmp: OsString = name.to_os_string();
    tmp.push(suffix);
    Ok(path.with_file_name(tmp))
}

/// `<path>.lock`, created on first use and never removed.
fn open_lock_file(path: &Path) -> Result<File> {
    let lock_path = sibling_path(path, ".lock")?;
    let mut opts = OpenOptions::new();
    opts.create(true).read(true).write(true);
    #[cfg(unix)]
    { opts.mode(0o600); }
    Ok(opts.open(lock_path)?)
}

#[cfg(unix)]
fn ensure_owner_only_permissions(file: &File) -> std::io::Result<()> {
    let meta = file.metadata()?;
    let mode = meta.permissions().mode() & 0o777;
    if mode != 0o600 {
        let mut p = meta.permissions();
        p.set_mode(0o600);
        file.set_permissions(p)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn ensure_owner_only_permissions(_file: &File) -> std::io::Result<()> { Ok(()) }

fn lock_exclusive_with_retry(file: &File) -> std::io::Result<()> {
    for _ in 0..MAX_RETRIES {
        match fs2::FileExt::try_lock_exclusive(file) {
            Ok(_) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(std::time::Duration::from_millis(RETRY_MS));
            }
            Err(e) => return Err(e),
        }
    }
    Err(std::io::Error::new(std::io::ErrorKind::WouldBlock, "vector store: lock timeout"))
}

fn lock_shared_with_retry(file: &File) -> std::io::Result<()> {
    for _ in 0..MAX_RETRIES {
        match fs2::FileExt::try_lock_shared(file) {
            Ok(_) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(std::time::Duration::from_millis(RETRY_MS));
            }
            Err(e) => return Err(e),
        }
    }
    Err(std::io::Error::new(std::io::ErrorKind::WouldBlock, "vector store: lock timeout"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn meta(id: &str) -> RecordMetadata {
        RecordMetadata {
            image_id: id.into(),
            image_path: format!("data/images/{id}.jpg"),
            caption: format!("caption for {id}"),
            indexed_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        }
    }

    fn abc_store() -> VectorStore {
        let mut store = VectorStore::new();
        store.add(vec![1.0, 0.0], meta("a"));
        store.add(vec![0.0, 1.0], meta("b"));
        store.add(vec![1.0, 1.0], meta("c"));
        store
    }

    #[test]
    fn similarity_ranks_abc_scenario() {
        let store = abc_store();
        let hits = store.similarity(&[1.0, 0.0]).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.metadata.image_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!((hits[1].score - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
        assert!(hits[2].score.abs() < 1e-6);
    }

    #[test]
    fn similarity_on_empty_store_is_empty() {
        let store = VectorStore::new();
        assert!(store.similarity(&[1.0, 0.0]).unwrap().is_empty());
        assert_eq!(store.dim(), None);
    }

    #[test]
    fn mismatched_dimension_fails_at_query_time() {
        let mut store = abc_store();
        store.add(vec![1.0, 0.0, 0.0], meta("d"));
        assert_eq!(store.count(), 4);
        let err = store.similarity(&[1.0, 0.0]).unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { expected: 2, got: 3 }));
    }

    #[test]
    fn all_is_restartable_and_ordered() {
        let store = abc_store();
        let first: Vec<&str> = store.all().map(|(_, m)| m.image_id.as_str()).collect();
        let second: Vec<&str> = store.all().map(|(_, m)| m.image_id.as_str()).collect();
        assert_eq!(first, vec!["a", "b", "c"]);
        assert_eq!(first, second);
        assert_eq!(store.all().len(), 3);
    }

    #[test]
    fn duplicates_are_kept() {
        let mut store = VectorStore::new();
        store.add(vec![1.0, 0.0], meta("a"));
        store.add(vec![1.0, 0.0], meta("a"));
        assert_eq!(store.count(), 2);
        let hits = store.similarity(&[1.0, 0.0]).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.metadata.image_id == "a"));
    }

    #[test]
    fn replace_keeps_slot() {
        let mut store = abc_store();
        let idx = store.position("b").unwrap();
        let mut m = meta("b");
        m.caption = "new caption".into();
        assert!(store.replace(idx, vec![0.5, 0.5], m));
        assert_eq!(store.count(), 3);
        let (v, m) = store.all().nth(1).unwrap();
        assert_eq!(v, &[0.5, 0.5]);
        assert_eq!(m.caption, "new caption");
        assert!(!store.replace(10, vec![1.0, 0.0], meta("x")));
    }

    #[test]
    fn save_and_load_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("image_captions_vectors.json");
        let store = abc_store();
        store.save(&path).unwrap();

        let loaded = VectorStore::load(&path).unwrap();
        assert_eq!(loaded.count(), store.count());
        assert_eq!(loaded, store);
        assert!(!tmp.path().join("nested").join("image_captions_vectors.json.tmp").exists());
    }

    #[test]
    fn save_overwrites_existing_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("v.json");
        abc_store().save(&path).unwrap();
        let mut small = VectorStore::new();
        small.add(vec![0.0, 1.0], meta("z"));
        small.save(&path).unwrap();
        let loaded = VectorStore::load(&path).unwrap();
        assert_eq!(loaded.count(), 1);
        assert_eq!(loaded.all().next().unwrap().1.image_id, "z");
    }

    #[test]
    fn load_missing_file_is_empty() {
        let tmp = TempDir::new().unwrap();
        let store = VectorStore::load(&tmp.path().join("absent.json")).unwrap();
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn load_garbage_is_malformed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("v.json");
        std::fs::write(&path, b"THIS IS NOT JSON").unwrap();
        let err = VectorStore::load(&path).unwrap_err();
        assert!(matches!(err, IndexError::Malformed { .. }));
    }

    #[test]
    fn load_length_mismatch_is_malformed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("v.json");
        std::fs::write(&path, br#"{"vectors":[[1.0,0.0],[0.0,1.0]],"metadata":[]}"#).unwrap();
        let err = VectorStore::load(&path).unwrap_err();
        match err {
            IndexError::Malformed { reason, .. } => assert!(reason.contains("2 vectors")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn load_object_without_vectors_is_malformed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("v.json");
        for body in [
            r#"{}"#,
            r#"{"image_id":"a","image_path":"a.jpg","caption":"x"}"#,
            r#"{"vectors":[],"metadata":[],"extra":1}"#,
        ] {
            std::fs::write(&path, body).unwrap();
            let err = VectorStore::load(&path).unwrap_err();
            assert!(matches!(err, IndexError::Malformed { .. }), "{body}: {err}");
        }
    }

    #[test]
    fn save_refuses_non_finite_components() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("v.json");
        abc_store().save(&path).unwrap();

        let mut store = abc_store();
        store.add(vec![f32::NAN, 1.0], meta("nan"));
        let err = store.save(&path).unwrap_err();
        assert!(matches!(err, IndexError::NonFinite { record: 3 }));

        let mut inf = VectorStore::new();
        inf.add(vec![f32::INFINITY, 0.0], meta("inf"));
        assert!(matches!(inf.save(&path), Err(IndexError::NonFinite { record: 0 })));

        // The previous file is untouched and still loads.
        assert_eq!(VectorStore::load(&path).unwrap(), abc_store());
    }

    #[test]
    fn load_waits_on_the_writer_lock() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("v.json");
        abc_store().save(&path).unwrap();
        assert!(tmp.path().join("v.json.lock").exists());

        let writer = open_lock_file(&path).unwrap();
        fs2::FileExt::lock_exclusive(&writer).unwrap();
        let err = VectorStore::load(&path).unwrap_err();
        assert!(matches!(err, IndexError::Io(ref e) if e.kind() == std::io::ErrorKind::WouldBlock));

        fs2::FileExt::unlock(&writer).unwrap();
        assert_eq!(VectorStore::load(&path).unwrap().count(), 3);
    }

    #[cfg(unix)]
    #[test]
    fn file_permissions_are_0600() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("v.json");
        abc_store().save(&path).unwrap();
        let meta = std::fs::metadata(&path).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
    }
}
