//! Speaker-embedding store.
//!
//! Maps every catalogue voice to a fixed-length x-vector. Building the map is
//! the expensive part (the ARCTIC archive is ~16 MB); it happens once per
//! process and is read-only afterwards, so the store is shared as
//! `Arc<EmbeddingStore>` with no locking.
//!
//! Acquisition order in [`EmbeddingStore::initialize`]:
//! 1. the local NPZ cache;
//! 2. the x-vector archive (result written back to the cache);
//! 3. seeded random unit vectors.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::{
    config::EmbeddingConfig,
    error::EmbeddingError,
    npz::{load_npz, save_npz, NpzArchive},
    voice::{VoiceId, VoiceProfile},
};

/// Dimension of the SpeechT5 x-vector speaker embedding.
pub const EMBEDDING_DIM: usize = 512;

/// A speaker-identity vector.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakerEmbedding(Vec<f32>);

impl SpeakerEmbedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }
}

/// Where a store's vectors came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingSource {
    Cache,
    Dataset,
    Random,
    Provided,
}

/// Supplies the on-disk path of an x-vector ZIP archive, fetching it if needed.
pub trait XvectorSource {
    fn archive_path(&self) -> anyhow::Result<PathBuf>;
}

/// An archive already present on disk.
pub struct LocalArchive(pub PathBuf);

impl XvectorSource for LocalArchive {
    fn archive_path(&self) -> anyhow::Result<PathBuf> {
        if !self.0.is_file() {
            anyhow::bail!("x-vector archive not found: {}", self.0.display());
        }
        Ok(self.0.clone())
    }
}

/// A source that always fails; forces the random-vector path.
pub struct NoArchive;

impl XvectorSource for NoArchive {
    fn archive_path(&self) -> anyhow::Result<PathBuf> {
        anyhow::bail!("no x-vector archive configured")
    }
}

#[derive(Debug)]
pub struct EmbeddingStore {
    embeddings: HashMap<VoiceId, SpeakerEmbedding>,
    dim: usize,
    source: EmbeddingSource,
}

impl EmbeddingStore {
    /// Build the store: cache, then archive, then random vectors.
    ///
    /// Fails only for a zero dimension; every acquisition problem is logged
    /// and absorbed by the next strategy.
    pub fn initialize(
        config: &EmbeddingConfig,
        source: &dyn XvectorSource,
    ) -> Result<Self, EmbeddingError> {
        if config.dim == 0 {
            return Err(EmbeddingError::ZeroDimension);
        }

        match Self::load_cache(&config.cache_path, config.dim) {
            Ok(Some(store)) => {
                info!(path = %config.cache_path.display(), voices = store.len(), "loaded speaker embeddings from cache");
                return Ok(store);
            }
            Ok(None) => debug!(path = %config.cache_path.display(), "no embedding cache yet"),
            Err(e) => warn!(error = %e, "ignoring unusable embedding cache"),
        }

        match Self::from_archive(source, config.dim) {
            Ok(store) => {
                info!(voices = store.len(), "selected speaker embeddings from x-vector archive");
                if let Err(e) = store.persist(&config.cache_path) {
                    warn!(error = %e, "could not write embedding cache");
                }
                return Ok(store);
            }
            Err(e) => warn!(error = %e, "x-vector archive unavailable; using random speaker embeddings"),
        }

        Self::random(config.dim)
    }

    /// Build from explicit vectors. The default voice must be present and all
    /// vectors must share one dimension.
    pub fn from_embeddings(
        embeddings: HashMap<VoiceId, Vec<f32>>,
    ) -> Result<Self, EmbeddingError> {
        Self::build(embeddings, EmbeddingSource::Provided)
    }

    fn build(
        embeddings: HashMap<VoiceId, Vec<f32>>,
        source: EmbeddingSource,
    ) -> Result<Self, EmbeddingError> {
        let dim = embeddings
            .get(&VoiceId::DEFAULT)
            .map(Vec::len)
            .ok_or(EmbeddingError::MissingDefault(VoiceId::DEFAULT.0))?;
        if dim == 0 {
            return Err(EmbeddingError::ZeroDimension);
        }
        if let Some((voice, v)) = embeddings.iter().find(|(_, v)| v.len() != dim) {
            return Err(EmbeddingError::DimensionMismatch {
                voice: voice.0,
                expected: dim,
                actual: v.len(),
            });
        }
        let embeddings = embeddings
            .into_iter()
            .map(|(k, v)| (k, SpeakerEmbedding::new(v)))
            .collect();
        Ok(Self { embeddings, dim, source })
    }

    /// Seeded random unit vectors (like real x-vectors), one per catalogue voice.
    pub fn random(dim: usize) -> Result<Self, EmbeddingError> {
        if dim == 0 {
            return Err(EmbeddingError::ZeroDimension);
        }
        let embeddings = VoiceProfile::all()
            .iter()
            .map(|profile| (profile.id, random_unit_vector(dim, profile.id.0 as u64)))
            .collect();
        Self::build(embeddings, EmbeddingSource::Random)
    }

    fn load_cache(path: &Path, dim: usize) -> Result<Option<Self>, EmbeddingError> {
        if !path.is_file() {
            return Ok(None);
        }
        let cache_err = |message: String| EmbeddingError::Cache {
            path: path.display().to_string(),
            message,
        };

        let arrays = load_npz(path).map_err(|e| cache_err(format!("{e:#}")))?;
        let mut embeddings = HashMap::new();
        for profile in VoiceProfile::all() {
            let array = arrays
                .get(&profile.id.to_string())
                .ok_or_else(|| cache_err(format!("no entry for voice {}", profile.id)))?;
            let vector = array
                .as_vector()
                .ok_or_else(|| cache_err(format!("voice {} is not a vector", profile.id)))?;
            if vector.len() != dim {
                return Err(EmbeddingError::DimensionMismatch {
                    voice: profile.id.0,
                    expected: dim,
                    actual: vector.len(),
                });
            }
            embeddings.insert(profile.id, vector.to_vec());
        }
        Self::build(embeddings, EmbeddingSource::Cache).map(Some)
    }

    fn from_archive(source: &dyn XvectorSource, dim: usize) -> Result<Self, EmbeddingError> {
        let path = source
            .archive_path()
            .map_err(|e| EmbeddingError::Dataset(format!("{e:#}")))?;
        let mut archive =
            NpzArchive::open(&path).map_err(|e| EmbeddingError::Dataset(format!("{e:#}")))?;

        let members = archive.member_names();
        if members.is_empty() {
            return Err(EmbeddingError::EmptyDataset);
        }

        let mut embeddings = HashMap::new();
        for profile in VoiceProfile::all() {
            // Indices are tuned for the full archive; wrap on trimmed copies.
            let member = &members[profile.xvector_index % members.len()];
            let array = archive
                .read(member)
                .map_err(|e| EmbeddingError::Dataset(format!("{e:#}")))?;
            let vector = array.as_vector().ok_or_else(|| {
                EmbeddingError::Dataset(format!("{} is not a vector (shape {:?})", member, array.shape))
            })?;
            if vector.len() != dim {
                return Err(EmbeddingError::DimensionMismatch {
                    voice: profile.id.0,
                    expected: dim,
                    actual: vector.len(),
                });
            }
            debug!(voice = %profile.id, member = %member, "selected x-vector");
            embeddings.insert(profile.id, vector.to_vec());
        }
        Self::build(embeddings, EmbeddingSource::Dataset)
    }

    /// Write the store to `path` as NPZ (one member per voice id).
    pub fn persist(&self, path: &Path) -> Result<(), EmbeddingError> {
        let mut arrays: Vec<(String, Vec<f32>)> = self
            .embeddings
            .iter()
            .map(|(id, e)| (id.to_string(), e.as_slice().to_vec()))
            .collect();
        arrays.sort_by(|a, b| a.0.cmp(&b.0));
        save_npz(path, &arrays).map_err(|e| EmbeddingError::Cache {
            path: path.display().to_string(),
            message: format!("{e:#}"),
        })
    }

    /// The id that will actually be used for `voice`.
    pub fn resolve(&self, voice: VoiceId) -> VoiceId {
        if self.embeddings.contains_key(&voice) {
            voice
        } else {
            debug!(requested = %voice, default = %VoiceId::DEFAULT, "unknown voice, using default");
            VoiceId::DEFAULT
        }
    }

    /// Embedding for `voice`, or the default voice's for unknown ids.
    pub fn get(&self, voice: VoiceId) -> &SpeakerEmbedding {
        // `build` guarantees the default entry exists.
        &self.embeddings[&self.resolve(voice)]
    }

    pub fn contains(&self, voice: VoiceId) -> bool {
        self.embeddings.contains_key(&voice)
    }

    pub fn voices(&self) -> Vec<VoiceId> {
        let mut ids: Vec<VoiceId> = self.embeddings.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn source(&self) -> EmbeddingSource {
        self.source
    }
}

fn random_unit_vector(dim: usize, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(0x5eed_0000 ^ seed);
    let mut v: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        v.iter_mut().for_each(|x| *x /= norm);
    } else {
        v.iter_mut().for_each(|x| *x = 1.0 / (dim as f32).sqrt());
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::npz::encode_npy;
    use crate::voice::VOICES;
    use std::io::Write;
    use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

    fn config_in(dir: &Path) -> EmbeddingConfig {
        EmbeddingConfig {
            cache_path: dir.join("speaker_embeddings.npz"),
            ..EmbeddingConfig::default()
        }
    }

    /// A small archive: `n` members, member `i` filled with `i / 1000`.
    fn write_archive(path: &Path, n: usize, dim: usize) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = ZipWriter::new(file);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        for i in 0..n {
            zip.start_file(format!("spkrec-xvect/utt_{:05}.npy", i), options).unwrap();
            zip.write_all(&encode_npy(&[dim], &vec![i as f32 / 1000.0; dim])).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_random_store_shape() {
        let store = EmbeddingStore::random(EMBEDDING_DIM).unwrap();
        assert_eq!(store.len(), VOICES.len());
        assert_eq!(store.source(), EmbeddingSource::Random);
        for profile in VOICES {
            let e = store.get(profile.id);
            assert_eq!(e.dim(), EMBEDDING_DIM);
            let norm: f32 = e.as_slice().iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_random_is_deterministic_and_distinct() {
        let a = EmbeddingStore::random(64).unwrap();
        let b = EmbeddingStore::random(64).unwrap();
        assert_eq!(a.get(VoiceId(1)), b.get(VoiceId(1)));
        assert_ne!(a.get(VoiceId(0)), a.get(VoiceId(1)));
    }

    #[test]
    fn test_unknown_voice_gets_default() {
        let store = EmbeddingStore::random(EMBEDDING_DIM).unwrap();
        assert_eq!(store.resolve(VoiceId(999_999)), VoiceId::DEFAULT);
        assert_eq!(store.get(VoiceId(999_999)), store.get(VoiceId::DEFAULT));
    }

    #[test]
    fn test_zero_dimension_is_fatal() {
        assert!(matches!(EmbeddingStore::random(0), Err(EmbeddingError::ZeroDimension)));
        let config = EmbeddingConfig { dim: 0, ..EmbeddingConfig::default() };
        assert!(EmbeddingStore::initialize(&config, &NoArchive).is_err());
    }

    #[test]
    fn test_from_embeddings_checks_shape() {
        let mut map = HashMap::new();
        map.insert(VoiceId(0), vec![0.0; 4]);
        map.insert(VoiceId(1), vec![0.0; 3]);
        assert!(matches!(
            EmbeddingStore::from_embeddings(map),
            Err(EmbeddingError::DimensionMismatch { voice: 1, expected: 4, actual: 3 })
        ));

        let mut map = HashMap::new();
        map.insert(VoiceId(3), vec![0.0; 4]);
        assert!(matches!(
            EmbeddingStore::from_embeddings(map),
            Err(EmbeddingError::MissingDefault(0))
        ));
    }

    #[test]
    fn test_initialize_without_archive_falls_back_to_random() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let store = EmbeddingStore::initialize(&config, &NoArchive).unwrap();
        assert_eq!(store.source(), EmbeddingSource::Random);
        // Random vectors are never cached.
        assert!(!config.cache_path.exists());
    }

    #[test]
    fn test_initialize_from_archive_then_cache() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("spkrec-xvect.zip");
        write_archive(&archive, 10, 8);
        let config = EmbeddingConfig { dim: 8, ..config_in(dir.path()) };

        let first = EmbeddingStore::initialize(&config, &LocalArchive(archive.clone())).unwrap();
        assert_eq!(first.source(), EmbeddingSource::Dataset);
        assert!(config.cache_path.exists());
        // Default voice index 7306 wraps to member 7306 % 10 = 6.
        assert_eq!(first.get(VoiceId::DEFAULT).as_slice(), &[0.006f32; 8][..]);

        std::fs::remove_file(&archive).unwrap();
        let second = EmbeddingStore::initialize(&config, &NoArchive).unwrap();
        assert_eq!(second.source(), EmbeddingSource::Cache);
        for profile in VOICES {
            assert_eq!(first.get(profile.id), second.get(profile.id));
        }
    }

    #[test]
    fn test_cache_with_wrong_dimension_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        EmbeddingStore::random(16).unwrap().persist(&config.cache_path).unwrap();

        let store = EmbeddingStore::initialize(&config, &NoArchive).unwrap();
        assert_eq!(store.source(), EmbeddingSource::Random);
        assert_eq!(store.dim(), EMBEDDING_DIM);
    }

    #[test]
    fn test_archive_with_wrong_dimension_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("xvect.zip");
        write_archive(&archive, 3, 4);
        let config = config_in(dir.path());
        let store = EmbeddingStore::initialize(&config, &LocalArchive(archive)).unwrap();
        assert_eq!(store.source(), EmbeddingSource::Random);
    }
}
