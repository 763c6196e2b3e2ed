use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use common::{
    config::{DimensionReduction, RunConfig},
    embedding::{reduction::build_reducer, Embedder, MockEmbedder},
    error::PipelineError,
    storage::{
        text::{MemoryTextStore, TextStore},
        vector::{
            MemoryVectorStore, MetadataFilter, QueryMatch, VectorMetadata, VectorRecord,
            VectorStore,
        },
    },
    types::Document,
};

use crate::splitter::TextSplitter;

use super::IngestionPipeline;

const MOCK_DIM: usize = 8;

fn run_config(use_threading: bool, reduction_path: Option<&str>) -> RunConfig {
    let reduction = match reduction_path {
        Some(path) => format!(
            r#"
  dimension_reduction:
    type: pca
    dims: 2
    path: {path}
"#
        ),
        None => String::new(),
    };
    let yaml = format!(
        r#"
run_id: test-run
task: ingest-test
threading:
  max_workers: 3
parser:
  processes:
    - name: chars
      steps:
        - strategy: character
          chunk_size: 200
          chunk_overlap: 50
          keep_empty: false
          trim_whitespace: true
embedding:
  provider: openai
  model: text-embedding-3-small
  use_threading: {use_threading}{reduction}
storage:
  vector:
    provider: flat
    dimension: {MOCK_DIM}
    upload: true
  text_store:
    client: sqlite
    upload: true
"#
    );
    RunConfig::from_yaml_str(&yaml).unwrap()
}

struct Fixture {
    pipeline: IngestionPipeline,
    vector_store: Arc<MemoryVectorStore>,
    text_store: Arc<MemoryTextStore>,
}

fn fixture(config: RunConfig, dry_run: bool) -> Fixture {
    let vector_store = Arc::new(MemoryVectorStore::new(MOCK_DIM));
    let text_store = Arc::new(MemoryTextStore::new());
    let pipeline = IngestionPipeline::new(
        config,
        Some(Arc::new(MockEmbedder::new(MOCK_DIM))),
        Some(vector_store.clone() as Arc<dyn VectorStore>),
        Some(text_store.clone() as Arc<dyn TextStore>),
        dry_run,
        CancellationToken::new(),
    );
    Fixture {
        pipeline,
        vector_store,
        text_store,
    }
}

fn sample_document() -> Document {
    let text: String = (0..500)
        .map(|i| char::from(b'a' + (i % 26) as u8))
        .collect();
    Document::new("sample.txt", "data/sample.txt", text)
}

#[tokio::test]
async fn small_document_ingests_into_both_stores() {
    let config = run_config(false, None);
    let Fixture {
        pipeline,
        vector_store,
        text_store,
    } = fixture(config.clone(), true);

    let document = sample_document();
    let report = pipeline.run(vec![document.clone()]).await.unwrap();

    assert_eq!(report.documents, 1);
    assert_eq!(report.chunks, 4);
    assert_eq!(report.stored_vectors, 4);
    assert_eq!(report.stored_texts, 4);
    assert!(!report.partial);
    assert!(report.errors.is_empty());

    // The same config reproduces the same chunk ids.
    let splitter = TextSplitter::new(config.parser.unwrap()).unwrap();
    let expected = splitter.split_document(&document);

    for chunk in &expected {
        assert!(vector_store
            .retrieve_from_id(&chunk.id)
            .await
            .unwrap()
            .is_some());
        let stored = text_store.retrieve_document(&chunk.id).await.unwrap();
        assert_eq!(stored.unwrap().text, chunk.text);
    }

    // Querying with a chunk's own text returns that chunk first.
    let embedder = MockEmbedder::new(MOCK_DIM);
    let query = embedder.embed(&expected[0].text).await.unwrap();
    let matches = vector_store.query(&query, 4, true, None).await.unwrap();
    assert_eq!(matches[0].id, expected[0].id);
    assert!(matches[0].score > matches[1].score);
}

#[tokio::test]
async fn adjacency_ids_are_written_into_metadata() {
    let config = run_config(false, None);
    let Fixture {
        pipeline,
        vector_store,
        ..
    } = fixture(config.clone(), true);

    let document = sample_document();
    pipeline.run(vec![document.clone()]).await.unwrap();

    let splitter = TextSplitter::new(config.parser.unwrap()).unwrap();
    let expected = splitter.split_document(&document);

    let first = vector_store
        .retrieve_from_id(&expected[0].id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.prev_chunk_id, None);
    assert_eq!(first.next_chunk_id.as_deref(), Some(expected[1].id.as_str()));

    let last = vector_store
        .retrieve_from_id(&expected[3].id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(last.prev_chunk_id.as_deref(), Some(expected[2].id.as_str()));
    assert_eq!(last.next_chunk_id, None);
}

#[tokio::test]
async fn empty_input_completes_without_writes_or_reducer_fit() {
    let dir = tempfile::tempdir().unwrap();
    let artifact = dir.path().join("pca_2.json");
    let config = run_config(false, Some(&artifact.to_string_lossy()));
    let Fixture { pipeline, .. } = fixture(config, false);

    let report = pipeline.run(Vec::new()).await.unwrap();

    assert_eq!(report.documents, 0);
    assert_eq!(report.chunks, 0);
    assert_eq!(report.stored_vectors, 0);
    assert!(!report.partial);
    assert!(!artifact.exists(), "no reducer fit on an empty run");
}

#[tokio::test]
async fn threaded_fanout_preserves_chunk_order() {
    let config = run_config(true, None);
    let Fixture {
        pipeline,
        vector_store,
        ..
    } = fixture(config.clone(), true);

    let document = sample_document();
    pipeline.run(vec![document.clone()]).await.unwrap();

    let splitter = TextSplitter::new(config.parser.unwrap()).unwrap();
    let expected = splitter.split_document(&document);
    let embedder = MockEmbedder::new(MOCK_DIM);

    // Each stored chunk answers a query on its own text with score ~1, so
    // the join preserved input order when attaching vectors.
    for chunk in &expected {
        let query = embedder.embed(&chunk.text).await.unwrap();
        let matches = vector_store.query(&query, 1, false, None).await.unwrap();
        assert_eq!(matches[0].id, chunk.id);
        assert!((matches[0].score - 1.0).abs() < 1e-4);
    }
}

#[tokio::test]
async fn reducer_fits_once_then_reloads() {
    let dir = tempfile::tempdir().unwrap();
    let artifact = dir.path().join("pca_2.json");
    let artifact_str = artifact.to_string_lossy().into_owned();
    let config = run_config(false, Some(&artifact_str));

    // Run A fits and persists the reducer.
    let run_a = fixture(config.clone(), false);
    run_a.pipeline.run(vec![sample_document()]).await.unwrap();
    assert!(artifact.exists(), "run A must persist the artifact");

    // Run B loads the artifact and ingests without re-fitting.
    let run_b = fixture(config.clone(), false);
    run_b.pipeline.run(vec![sample_document()]).await.unwrap();

    // The same query resolves to the same top-1 chunk in both runs.
    let reduction = DimensionReduction {
        kind: "pca".to_string(),
        dims: 2,
        seed: 42,
        path: Some(artifact_str),
    };
    let mut reducer = build_reducer(&reduction).unwrap();
    reducer.load(None).unwrap();

    let embedder = MockEmbedder::new(MOCK_DIM);
    let raw = embedder.embed("abcdefghij").await.unwrap();
    let query = reducer.transform_one(&raw).unwrap();

    let top_a = run_a
        .vector_store
        .query(&query, 1, false, None)
        .await
        .unwrap();
    let top_b = run_b
        .vector_store
        .query(&query, 1, false, None)
        .await
        .unwrap();
    assert_eq!(top_a[0].id, top_b[0].id);
}

#[tokio::test]
async fn dry_run_skips_reduction_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let artifact = dir.path().join("pca_2.json");
    let config = run_config(false, Some(&artifact.to_string_lossy()));
    let Fixture { pipeline, .. } = fixture(config, true);

    pipeline.run(vec![sample_document()]).await.unwrap();
    assert!(!artifact.exists(), "dry runs must not write artifacts");
}

#[tokio::test]
async fn cancelled_token_aborts_the_run() {
    let config = run_config(false, None);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let pipeline = IngestionPipeline::new(
        config,
        Some(Arc::new(MockEmbedder::new(MOCK_DIM))),
        Some(Arc::new(MemoryVectorStore::new(MOCK_DIM)) as Arc<dyn VectorStore>),
        Some(Arc::new(MemoryTextStore::new()) as Arc<dyn TextStore>),
        true,
        cancel,
    );

    assert!(matches!(
        pipeline.run(vec![sample_document()]).await,
        Err(PipelineError::Cancelled)
    ));
}

/// Vector store double that rejects one specific chunk id.
struct FailingVectorStore {
    inner: MemoryVectorStore,
    poison_id: String,
}

#[async_trait]
impl VectorStore for FailingVectorStore {
    fn provider(&self) -> &'static str {
        "failing"
    }

    async fn upload(&self, record: VectorRecord) -> Result<(), PipelineError> {
        if record.chunk_id == self.poison_id {
            return Err(PipelineError::Store("simulated upload failure".to_string()));
        }
        self.inner.upload(record).await
    }

    async fn retrieve_from_id(&self, id: &str) -> Result<Option<VectorMetadata>, PipelineError> {
        self.inner.retrieve_from_id(id).await
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        include_metadata: bool,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<QueryMatch>, PipelineError> {
        self.inner.query(vector, top_k, include_metadata, filter).await
    }

    async fn delete(&self, ids: &[String]) -> Result<usize, PipelineError> {
        self.inner.delete(ids).await
    }

    async fn clear(&self) -> Result<(), PipelineError> {
        self.inner.clear().await
    }

    async fn count(&self) -> Result<usize, PipelineError> {
        self.inner.count().await
    }
}

#[tokio::test]
async fn partial_store_failure_is_recorded_not_fatal() {
    let config = run_config(false, None);
    let document = sample_document();

    let splitter = TextSplitter::new(config.parser.clone().unwrap()).unwrap();
    let poison_id = splitter.split_document(&document)[1].id.clone();

    let vector_store = Arc::new(FailingVectorStore {
        inner: MemoryVectorStore::new(MOCK_DIM),
        poison_id: poison_id.clone(),
    });
    let text_store = Arc::new(MemoryTextStore::new());

    let pipeline = IngestionPipeline::new(
        config,
        Some(Arc::new(MockEmbedder::new(MOCK_DIM))),
        Some(vector_store as Arc<dyn VectorStore>),
        Some(text_store.clone() as Arc<dyn TextStore>),
        true,
        CancellationToken::new(),
    );

    let report = pipeline.run(vec![document]).await.unwrap();

    assert!(report.partial);
    assert_eq!(report.stored_vectors, 3);
    assert_eq!(report.stored_texts, 4);
    assert!(report
        .errors
        .iter()
        .any(|err| err.starts_with("StoreError") && err.contains(&poison_id)));
    assert!(report
        .errors
        .iter()
        .any(|err| err.starts_with("InconsistencyDetected") && err.contains(&poison_id)));
}
