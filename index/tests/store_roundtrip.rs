#![allow(clippy::unwrap_used)]

use chrono::Utc;
use tempfile::TempDir;
use vlmrag_index::EmbeddingProvider;
use vlmrag_index::HashingEmbeddingProvider;
use vlmrag_index::RecordMetadata;
use vlmrag_index::VectorStore;

fn record(id: &str, caption: &str) -> RecordMetadata {
    RecordMetadata {
        image_id: id.into(),
        image_path: format!("data/images/{id}.png"),
        caption: caption.into(),
        indexed_at: Utc::now(),
    }
}

#[test]
fn persisted_store_answers_like_the_original() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("image_captions_vectors.json");
    let embedder = HashingEmbeddingProvider::new(128);

    let captions = [
        ("000001", "a man riding a bicycle on a city street"),
        ("000002", "two cats sleeping on a sofa indoors"),
        ("000003", "a red car parked in front of a building"),
        ("000004", "people walking on a beach at sunset"),
    ];
    let mut store = VectorStore::new();
    for (id, caption) in captions {
        store.add(embedder.embed(caption).unwrap(), record(id, caption));
    }
    store.save(&path).unwrap();

    let reloaded = VectorStore::load(&path).unwrap();
    assert_eq!(reloaded.count(), store.count());

    let q = embedder.embed("red car").unwrap();
    let before = store.similarity(&q).unwrap();
    let after = reloaded.similarity(&q).unwrap();
    assert_eq!(before, after);
    assert_eq!(after[0].metadata.image_id, "000003");
    for w in after.windows(2) {
        assert!(w[0].score >= w[1].score);
    }
}

#[test]
fn public_file_format_has_parallel_sequences() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("v.json");
    let mut store = VectorStore::new();
    store.add(vec![1.0, 0.0], record("a", "alpha"));
    store.add(vec![0.0, 1.0], record("b", "bravo"));
    store.save(&path).unwrap();

    let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    let vectors = raw["vectors"].as_array().unwrap();
    let metadata = raw["metadata"].as_array().unwrap();
    assert_eq!(vectors.len(), 2);
    assert_eq!(metadata.len(), 2);
    assert_eq!(metadata[1]["image_id"], "b");
    assert_eq!(metadata[0]["caption"], "alpha");
    assert!(metadata[0]["indexed_at"].is_string());
}
