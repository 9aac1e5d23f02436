//! Matching orchestrator: the public-facing entry point.
//!
//! `NameMatcher` turns raw name strings into embedding queries (via
//! preprocessing, the embedding cache, and the producer), owns the index
//! lifecycle (build / load / expand / save), and drives single, sequential
//! batch, and parallel batch matching.
//!
//! # Concurrency
//!
//! Batch matching with `jobs > 1` runs on a dedicated rayon pool; each
//! worker embeds and searches its own batches, and results are collected in
//! submission order. The cache and the index are shared for concurrent
//! reads during a batch. Mutating the index concurrently with an in-flight
//! batch is unsupported; the `&mut self` receivers on `build_index`,
//! `load_index`, and `expand_index` enforce this statically for a single
//! owner, and callers sharing a matcher must serialize externally. There is
//! no cancellation: a submitted batch runs to completion.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use rayon::prelude::*;

use crate::cache::EmbeddingCache;
use crate::config::Settings;
use crate::embedding::{EmbeddingProducer, FastEmbedProducer};
use crate::error::{MatchError, MatchResult};
use crate::preprocess::Preprocessor;
use crate::vector::{Score, SearchMode, VectorStore, cosine_similarity};

/// Minimum candidate pool fetched before threshold filtering in
/// approximate mode.
const MIN_APPROX_CANDIDATES: usize = 20;

/// Options controlling a `find_matches` call.
#[derive(Debug, Clone)]
pub struct MatchOptions {
    /// Minimum similarity score for a result to count as a match.
    pub threshold: f32,

    /// Number of top matches returned per query.
    pub k: usize,

    /// Exact or approximate search.
    pub mode: SearchMode,

    /// Queries per embedding batch in the multi-name path.
    pub batch_size: usize,

    /// Worker count for the multi-name path. 1 is sequential; 0 or any
    /// value above the available core count is clamped to all cores.
    pub jobs: usize,

    /// Number of nearest clusters probed in approximate mode.
    pub n_probe_clusters: usize,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            threshold: 0.9,
            k: 5,
            mode: SearchMode::Exact,
            batch_size: 32,
            jobs: 1,
            n_probe_clusters: 1,
        }
    }
}

impl MatchOptions {
    /// Builds options from the search section of [`Settings`].
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            threshold: settings.search.threshold,
            k: settings.search.k,
            mode: if settings.search.approximate {
                SearchMode::Approximate
            } else {
                SearchMode::Exact
            },
            batch_size: settings.search.batch_size,
            jobs: settings.search.jobs,
            n_probe_clusters: settings.search.n_probe_clusters,
        }
    }
}

/// Company name matcher backed by embedding similarity search.
///
/// Construct with [`NameMatcher::new`] (defaults) or
/// [`NameMatcher::from_settings`], then `build_index` or `load_index`
/// before matching.
pub struct NameMatcher {
    producer: Arc<dyn EmbeddingProducer>,
    preprocessor: Preprocessor,
    cache: Option<Mutex<EmbeddingCache>>,
    store: Option<VectorStore>,
}

impl NameMatcher {
    /// Creates a matcher with the default preprocessor and a 1000-entry
    /// embedding cache.
    #[must_use]
    pub fn new(producer: Arc<dyn EmbeddingProducer>) -> Self {
        Self {
            producer,
            preprocessor: Preprocessor::default(),
            cache: Some(Mutex::new(EmbeddingCache::new(1000))),
            store: None,
        }
    }

    /// Creates a matcher from layered settings, initializing a fastembed
    /// producer for the configured model.
    pub fn from_settings(settings: &Settings) -> MatchResult<Self> {
        let model = parse_embedding_model(&settings.model.name)?;
        let producer = FastEmbedProducer::new(
            model,
            &settings.model.cache_dir,
            settings.model.show_download_progress,
        )?;

        let mut matcher = Self::new(Arc::new(producer))
            .with_preprocessor(Preprocessor::with_stopwords(
                settings.preprocess.stopwords.clone(),
            ));
        matcher = if settings.cache.enabled {
            matcher.with_cache_size(settings.cache.size)
        } else {
            matcher.without_cache()
        };
        Ok(matcher)
    }

    /// Replaces the preprocessor.
    #[must_use]
    pub fn with_preprocessor(mut self, preprocessor: Preprocessor) -> Self {
        self.preprocessor = preprocessor;
        self
    }

    /// Sets the embedding cache capacity.
    #[must_use]
    pub fn with_cache_size(mut self, size: usize) -> Self {
        self.cache = Some(Mutex::new(EmbeddingCache::new(size)));
        self
    }

    /// Disables the embedding cache; every embed call goes straight to the
    /// producer.
    #[must_use]
    pub fn without_cache(mut self) -> Self {
        self.cache = None;
        self
    }

    /// Whether an index has been built or loaded.
    #[must_use]
    pub fn has_index(&self) -> bool {
        self.store.is_some()
    }

    /// Number of catalog entries in the current index, 0 without one.
    #[must_use]
    pub fn index_len(&self) -> usize {
        self.store.as_ref().map_or(0, VectorStore::len)
    }

    /// Catalog labels of the current index, in insertion order.
    #[must_use]
    pub fn index_labels(&self) -> Option<&[String]> {
        self.store.as_ref().map(VectorStore::labels)
    }

    /// Embeds a single name: preprocess, cache lookup, producer on miss.
    pub fn embed(&self, name: &str) -> MatchResult<Vec<f32>> {
        let mut embeddings = self.embed_batch(&[name])?;
        // embed_batch returns exactly one vector per input.
        Ok(embeddings.remove(0))
    }

    /// Embeds a batch of names with one producer call for the whole
    /// missing subset.
    pub fn embed_batch<S: AsRef<str>>(&self, names: &[S]) -> MatchResult<Vec<Vec<f32>>> {
        let keys: Vec<String> = names
            .iter()
            .map(|n| self.preprocessor.apply(n.as_ref()))
            .collect();
        self.embed_preprocessed(&keys)
    }

    /// Cosine similarity of two names, in `[-1, 1]` up to float slop.
    ///
    /// Symmetric, and `compare(a, a)` is ~1.0 for any non-degenerate name.
    pub fn compare(&self, name_a: &str, name_b: &str) -> MatchResult<f32> {
        let embeddings = self.embed_batch(&[name_a, name_b])?;
        Ok(cosine_similarity(&embeddings[0], &embeddings[1]))
    }

    /// Embeds a catalog of names and builds a fresh index over it,
    /// partitioned into at most `n_clusters` clusters.
    ///
    /// With `save_dir` set, the new index is persisted there, replacing any
    /// previous artifacts (use [`Self::save_index`] for the strict
    /// no-overwrite behavior).
    pub fn build_index<S: AsRef<str>>(
        &mut self,
        names: &[S],
        n_clusters: usize,
        save_dir: Option<&Path>,
    ) -> MatchResult<()> {
        let embeddings = self.embed_batch(names)?;
        let labels: Vec<String> = names.iter().map(|n| n.as_ref().to_string()).collect();

        let mut store = VectorStore::from_entries(embeddings, labels)?;
        store.build_partition(n_clusters)?;

        if let Some(dir) = save_dir {
            store.save(dir, true)?;
        }
        self.store = Some(store);
        Ok(())
    }

    /// Loads a previously saved index, replacing any current one.
    pub fn load_index(&mut self, dir: &Path) -> MatchResult<()> {
        self.store = Some(VectorStore::load(dir)?);
        Ok(())
    }

    /// Persists the current index. Refuses to overwrite existing artifacts
    /// unless `overwrite` is set.
    pub fn save_index(&self, dir: &Path, overwrite: bool) -> MatchResult<()> {
        let store = self.store.as_ref().ok_or(MatchError::NoIndex)?;
        store.save(dir, overwrite)?;
        Ok(())
    }

    /// Appends new names to the existing index. New entries are assigned to
    /// their nearest existing centroid; centroids are not recomputed.
    pub fn expand_index<S: AsRef<str>>(
        &mut self,
        new_names: &[S],
        save_dir: Option<&Path>,
    ) -> MatchResult<()> {
        if self.store.is_none() {
            return Err(MatchError::NoIndex);
        }
        let embeddings = self.embed_batch(new_names)?;
        let labels: Vec<String> = new_names.iter().map(|n| n.as_ref().to_string()).collect();

        let store = self.store.as_mut().ok_or(MatchError::NoIndex)?;
        store.add_entries(embeddings, labels)?;

        if let Some(dir) = save_dir {
            store.save(dir, true)?;
        }
        Ok(())
    }

    /// Finds catalog entries matching a single name, descending by score,
    /// at most `options.k` results, all scoring at least
    /// `options.threshold`.
    pub fn find_matches(
        &self,
        name: &str,
        options: &MatchOptions,
    ) -> MatchResult<Vec<(String, Score)>> {
        let store = self.store.as_ref().ok_or(MatchError::NoIndex)?;
        let embedding = self.embed(name)?;
        self.match_embedding(&embedding, store, options)
    }

    /// Finds matches for a list of names. The result list is index-aligned
    /// with the input regardless of worker scheduling.
    pub fn find_matches_batch<S: AsRef<str> + Sync>(
        &self,
        names: &[S],
        options: &MatchOptions,
    ) -> MatchResult<Vec<Vec<(String, Score)>>> {
        let store = self.store.as_ref().ok_or(MatchError::NoIndex)?;
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let batch_size = options.batch_size.max(1);
        let batches: Vec<&[S]> = names.chunks(batch_size).collect();

        if options.jobs == 1 {
            let mut results = Vec::with_capacity(names.len());
            for batch in batches {
                results.extend(self.match_batch(batch, store, options)?);
            }
            return Ok(results);
        }

        let jobs = resolve_jobs(options.jobs);
        tracing::debug!(jobs, batches = batches.len(), "parallel batch dispatch");

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build()
            .map_err(|e| MatchError::PoolBuild(e.to_string()))?;

        // par_iter + collect keeps submission order, so the output stays
        // index-aligned with the input no matter which worker finishes
        // first.
        let per_batch: Vec<Vec<Vec<(String, Score)>>> = pool.install(|| {
            batches
                .par_iter()
                .map(|batch| self.match_batch(batch, store, options))
                .collect::<MatchResult<_>>()
        })?;

        Ok(per_batch.into_iter().flatten().collect())
    }

    /// Embeds one batch in a single producer call and matches each result.
    fn match_batch<S: AsRef<str>>(
        &self,
        batch: &[S],
        store: &VectorStore,
        options: &MatchOptions,
    ) -> MatchResult<Vec<Vec<(String, Score)>>> {
        let embeddings = self.embed_batch(batch)?;
        embeddings
            .iter()
            .map(|embedding| self.match_embedding(embedding, store, options))
            .collect()
    }

    /// Searches the store for one embedding and applies the threshold.
    fn match_embedding(
        &self,
        embedding: &[f32],
        store: &VectorStore,
        options: &MatchOptions,
    ) -> MatchResult<Vec<(String, Score)>> {
        let matches = match options.mode {
            SearchMode::Approximate => {
                // Over-fetch: the threshold filter runs after the top-k
                // cut, so a bare k would under-fill the result.
                let fetch = (options.k * 2).max(MIN_APPROX_CANDIDATES);
                let mut matches = store.search(
                    embedding,
                    fetch,
                    SearchMode::Approximate,
                    options.n_probe_clusters,
                )?;
                matches.retain(|(_, score)| score.get() >= options.threshold);
                matches.truncate(options.k);
                matches
            }
            SearchMode::Exact => {
                let mut matches =
                    store.search(embedding, options.k, SearchMode::Exact, options.n_probe_clusters)?;
                matches.retain(|(_, score)| score.get() >= options.threshold);
                matches
            }
        };
        Ok(matches)
    }

    /// Resolves preprocessed keys to embeddings through the cache.
    ///
    /// All misses go to the producer in one deduplicated batch call.
    /// Results are assembled from a local map so correctness does not
    /// depend on the cache capacity exceeding the batch size.
    fn embed_preprocessed(&self, keys: &[String]) -> MatchResult<Vec<Vec<f32>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let Some(cache) = &self.cache else {
            let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
            return Ok(self.producer.embed_batch(&refs)?);
        };

        let mut resolved: HashMap<&str, Vec<f32>> = HashMap::new();
        let mut missing: Vec<&str> = Vec::new();
        {
            let cache = cache.lock();
            for key in keys {
                if resolved.contains_key(key.as_str()) {
                    continue;
                }
                if let Some(embedding) = cache.get(key) {
                    resolved.insert(key, embedding.to_vec());
                } else if !missing.contains(&key.as_str()) {
                    missing.push(key);
                }
            }
        }

        if !missing.is_empty() {
            let computed = self.producer.embed_batch(&missing)?;
            let mut cache = cache.lock();
            for (key, embedding) in missing.iter().zip(computed) {
                cache.insert(key.to_string(), embedding.clone());
                resolved.insert(key, embedding);
            }
        }

        keys.iter()
            .map(|key| {
                // Every key was either a cache hit or part of the missing
                // batch, so a gap here means the producer returned short.
                resolved.get(key.as_str()).cloned().ok_or_else(|| {
                    MatchError::Vector(crate::vector::VectorError::EmbeddingFailed(format!(
                        "producer returned no embedding for '{key}'"
                    )))
                })
            })
            .collect()
    }
}

impl std::fmt::Debug for NameMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NameMatcher")
            .field("preprocessor", &self.preprocessor)
            .field("cache_enabled", &self.cache.is_some())
            .field("index_len", &self.index_len())
            .finish()
    }
}

/// Clamps a requested job count to the available hardware parallelism.
/// 0 means "all cores".
fn resolve_jobs(jobs: usize) -> usize {
    let cores = num_cpus::get().max(1);
    if jobs == 0 || jobs > cores { cores } else { jobs }
}

/// Maps a configured model name to a fastembed model.
fn parse_embedding_model(name: &str) -> MatchResult<fastembed::EmbeddingModel> {
    use fastembed::EmbeddingModel;
    match name {
        "AllMiniLML6V2" | "all-MiniLM-L6-v2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "AllMiniLML12V2" | "all-MiniLM-L12-v2" => Ok(EmbeddingModel::AllMiniLML12V2),
        "BGESmallENV15" | "bge-small-en-v1.5" => Ok(EmbeddingModel::BGESmallENV15),
        "MultilingualE5Small" | "multilingual-e5-small" => {
            Ok(EmbeddingModel::MultilingualE5Small)
        }
        other => Err(MatchError::Config {
            reason: format!("unknown embedding model '{other}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::VectorDimension;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Deterministic producer: each distinct text hashes to a fixed
    /// pseudo-random unit vector, so identical texts embed identically and
    /// distinct texts are near-orthogonal at this dimension.
    struct HashProducer {
        dimension: usize,
        calls: AtomicUsize,
        texts_embedded: AtomicUsize,
    }

    impl HashProducer {
        fn new(dimension: usize) -> Self {
            Self {
                dimension,
                calls: AtomicUsize::new(0),
                texts_embedded: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn vector_for(&self, text: &str) -> Vec<f32> {
            use std::hash::{DefaultHasher, Hash, Hasher};
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            let mut state = hasher.finish() | 1;

            let mut vector = Vec::with_capacity(self.dimension);
            for _ in 0..self.dimension {
                // xorshift64
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                vector.push((state as f32 / u64::MAX as f32) - 0.5);
            }
            let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
            vector.iter().map(|x| x / norm).collect()
        }
    }

    impl EmbeddingProducer for HashProducer {
        fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, crate::vector::VectorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.texts_embedded.fetch_add(texts.len(), Ordering::SeqCst);
            Ok(texts.iter().map(|t| self.vector_for(t)).collect())
        }

        fn dimension(&self) -> VectorDimension {
            VectorDimension::new(self.dimension).unwrap()
        }
    }

    fn matcher_with_producer() -> (NameMatcher, Arc<HashProducer>) {
        let producer = Arc::new(HashProducer::new(64));
        let matcher = NameMatcher::new(producer.clone());
        (matcher, producer)
    }

    #[test]
    fn compare_is_idempotent_and_symmetric() {
        let (matcher, _) = matcher_with_producer();

        let self_score = matcher.compare("Acme Corp", "Acme Corp").unwrap();
        assert!((self_score - 1.0).abs() < 1e-5);

        let ab = matcher.compare("Acme Corp", "Globex Corporation").unwrap();
        let ba = matcher.compare("Globex Corporation", "Acme Corp").unwrap();
        assert_eq!(ab, ba);
    }

    #[test]
    fn names_sharing_a_preprocessed_key_are_identical() {
        let (matcher, _) = matcher_with_producer();
        // "Acme Corp" and "ACME, Inc." both preprocess to "acme".
        let score = matcher.compare("Acme Corp", "ACME, Inc.").unwrap();
        assert!((score - 1.0).abs() < 1e-5);
    }

    #[test]
    fn cache_saves_producer_calls() {
        let (matcher, producer) = matcher_with_producer();

        let first = matcher.embed("Acme Corp").unwrap();
        assert_eq!(producer.call_count(), 1);

        let second = matcher.embed("Acme Corp").unwrap();
        assert_eq!(producer.call_count(), 1, "hit must not call the producer");
        assert_eq!(first, second, "cached vector is bit-identical");
    }

    #[test]
    fn disabled_cache_always_calls_producer() {
        let producer = Arc::new(HashProducer::new(64));
        let matcher = NameMatcher::new(producer.clone()).without_cache();

        matcher.embed("Acme Corp").unwrap();
        matcher.embed("Acme Corp").unwrap();
        assert_eq!(producer.call_count(), 2);
    }

    #[test]
    fn batch_embedding_uses_one_producer_call() {
        let (matcher, producer) = matcher_with_producer();
        let names = ["Acme Corp", "Globex Corporation", "Initech LLC"];
        let embeddings = matcher.embed_batch(&names).unwrap();
        assert_eq!(embeddings.len(), 3);
        assert_eq!(producer.call_count(), 1);
    }

    #[test]
    fn find_matches_requires_index() {
        let (matcher, _) = matcher_with_producer();
        let result = matcher.find_matches("Acme", &MatchOptions::default());
        assert!(matches!(result, Err(MatchError::NoIndex)));
    }

    #[test]
    fn expand_requires_index() {
        let (mut matcher, _) = matcher_with_producer();
        let result = matcher.expand_index(&["Acme Corp"], None);
        assert!(matches!(result, Err(MatchError::NoIndex)));
    }

    #[test]
    fn save_requires_index() {
        let (matcher, _) = matcher_with_producer();
        let temp = tempfile::TempDir::new().unwrap();
        assert!(matches!(
            matcher.save_index(temp.path(), true),
            Err(MatchError::NoIndex)
        ));
    }

    #[test]
    fn build_and_match_scenario() {
        let (mut matcher, _) = matcher_with_producer();
        let catalog = ["Acme Corp", "Globex Corporation", "Initech LLC"];
        matcher.build_index(&catalog, 2, None).unwrap();

        let options = MatchOptions {
            threshold: 0.8,
            k: 3,
            ..MatchOptions::default()
        };
        let matches = matcher.find_matches("Acme", &options).unwrap();

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].0, "Acme Corp");
        assert!(matches[0].1.get() >= 0.8);
    }

    #[test]
    fn index_growth_preserves_label_order() {
        let (mut matcher, _) = matcher_with_producer();
        matcher.build_index(&["A", "B"], 2, None).unwrap();
        matcher.expand_index(&["C"], None).unwrap();

        assert_eq!(matcher.index_len(), 3);
        assert_eq!(matcher.index_labels().unwrap(), &["A", "B", "C"]);

        let options = MatchOptions {
            threshold: 0.9,
            k: 1,
            ..MatchOptions::default()
        };
        let matches = matcher.find_matches("C", &options).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].0, "C");
        assert!((matches[0].1.get() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn batch_results_align_with_input_order() {
        let (mut matcher, _) = matcher_with_producer();
        let catalog: Vec<String> = (0..9).map(|i| format!("Company {i}")).collect();
        matcher.build_index(&catalog, 3, None).unwrap();

        let options = MatchOptions {
            threshold: 0.5,
            k: 1,
            batch_size: 2,
            jobs: 4,
            ..MatchOptions::default()
        };
        let results = matcher.find_matches_batch(&catalog, &options).unwrap();

        assert_eq!(results.len(), catalog.len());
        for (query, matches) in catalog.iter().zip(&results) {
            assert_eq!(&matches[0].0, query, "result row must match its query");
        }
    }

    #[test]
    fn sequential_and_parallel_batches_agree() {
        let (mut matcher, _) = matcher_with_producer();
        let catalog: Vec<String> = (0..12).map(|i| format!("Entity {i}")).collect();
        matcher.build_index(&catalog, 4, None).unwrap();

        let queries: Vec<String> = catalog.iter().rev().cloned().collect();
        let sequential = matcher
            .find_matches_batch(&queries, &MatchOptions {
                threshold: 0.5,
                k: 2,
                batch_size: 5,
                jobs: 1,
                ..MatchOptions::default()
            })
            .unwrap();
        let parallel = matcher
            .find_matches_batch(&queries, &MatchOptions {
                threshold: 0.5,
                k: 2,
                batch_size: 5,
                jobs: 0,
                ..MatchOptions::default()
            })
            .unwrap();

        assert_eq!(sequential, parallel);
    }

    #[test]
    fn empty_batch_returns_empty() {
        let (mut matcher, _) = matcher_with_producer();
        matcher.build_index(&["A", "B"], 1, None).unwrap();
        let results = matcher
            .find_matches_batch::<String>(&[], &MatchOptions::default())
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn approximate_with_full_probing_matches_exact() {
        let (mut matcher, _) = matcher_with_producer();
        let catalog: Vec<String> = (0..20).map(|i| format!("Firm {i}")).collect();
        matcher.build_index(&catalog, 4, None).unwrap();

        let exact = MatchOptions {
            threshold: 0.0,
            k: 5,
            mode: SearchMode::Exact,
            ..MatchOptions::default()
        };
        let approx = MatchOptions {
            threshold: 0.0,
            k: 5,
            mode: SearchMode::Approximate,
            n_probe_clusters: 20,
            ..MatchOptions::default()
        };

        for query in &catalog {
            let exact_matches = matcher.find_matches(query, &exact).unwrap();
            let approx_matches = matcher.find_matches(query, &approx).unwrap();
            assert_eq!(exact_matches, approx_matches);
        }
    }

    #[test]
    fn resolve_jobs_clamps_to_cores() {
        let cores = num_cpus::get().max(1);
        assert_eq!(resolve_jobs(0), cores);
        assert_eq!(resolve_jobs(1), 1);
        assert_eq!(resolve_jobs(usize::MAX), cores);
    }

    #[test]
    fn parse_model_names() {
        assert!(parse_embedding_model("AllMiniLML6V2").is_ok());
        assert!(parse_embedding_model("bge-small-en-v1.5").is_ok());
        assert!(matches!(
            parse_embedding_model("no-such-model"),
            Err(MatchError::Config { .. })
        ));
    }
}
