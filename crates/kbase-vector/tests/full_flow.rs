use kbase_core::{Chunk, ChunkMetadata, Error, MetadataFilter, VectorIndex};
use kbase_vector::LanceCollectionStore;
use tempfile::TempDir;

fn unit(dim: usize, hot: usize) -> Vec<f32> {
    let mut v = vec![0.0; dim];
    v[hot] = 1.0;
    v
}

fn chunk(text: &str, vector: Vec<f32>, source: &str, page: u32) -> Chunk {
    Chunk::new(text, vector, ChunkMetadata::new(source).with("page", page))
}

fn sample() -> Vec<Chunk> {
    vec![
        chunk("solar panels on the barn roof", unit(4, 0), "energy.md", 1),
        chunk("rainwater tank maintenance", unit(4, 1), "water.txt", 1),
        chunk("battery bank sizing", unit(4, 2), "energy.md", 2),
    ]
}

#[tokio::test]
async fn lance_store_full_flow() {
    let tmp = TempDir::new().expect("tmp");
    let store = LanceCollectionStore::new(tmp.path().join("db"));
    assert!(store.list_collections().await.unwrap().is_empty());
    assert!(store.search("kb", &unit(4, 0), 3).await.unwrap().is_empty());
    assert_eq!(store.count("kb").await.unwrap(), 0);

    let ids = store.upsert("kb", sample()).await.expect("upsert");
    assert_eq!(ids.len(), 3);
    assert_eq!(store.count("kb").await.unwrap(), 3);
    assert!(store.list_collections().await.unwrap().contains("kb"));

    let hits = store.search("kb", &unit(4, 2), 2).await.expect("search");
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].text, "battery bank sizing");
    assert_eq!(hits[0].id, ids[2]);
    assert!(hits[0].distance.abs() < 1e-5);
    assert_eq!(hits[0].metadata.source_file, "energy.md");
    assert_eq!(hits[0].metadata.get("page"), Some(2u32.into()));

    let all = store.search("kb", &unit(4, 0), 10).await.unwrap();
    assert_eq!(all.len(), 3);
    assert!(all.windows(2).all(|w| w[0].distance <= w[1].distance));

    let sources = store.list_sources("kb").await.unwrap();
    assert_eq!(sources.into_iter().collect::<Vec<_>>(), vec!["energy.md", "water.txt"]);
}

#[tokio::test]
async fn deletes_by_source_and_metadata() {
    let tmp = TempDir::new().expect("tmp");
    let store = LanceCollectionStore::new(tmp.path());
    store.upsert("kb", sample()).await.unwrap();

    let by_page = MetadataFilter::source_file("energy.md").and("page", 2u32);
    assert_eq!(store.delete_where("kb", &by_page).await.unwrap(), 1);
    assert_eq!(store.count("kb").await.unwrap(), 2);

    let by_source = MetadataFilter::source_file("energy.md");
    assert_eq!(store.delete_where("kb", &by_source).await.unwrap(), 1);
    assert_eq!(store.delete_where("kb", &by_source).await.unwrap(), 0);
    assert_eq!(store.count("kb").await.unwrap(), 1);
    assert!(matches!(store.delete_where("kb", &MetadataFilter::new()).await, Err(Error::InvalidInput(_))));
    assert_eq!(store.delete_where("missing", &by_source).await.unwrap(), 0);

    let ids = store.upsert("kb", vec![chunk("o'brien's notes", unit(4, 3), "o'brien.txt", 1)]).await.unwrap();
    assert_eq!(store.delete_where("kb", &MetadataFilter::source_file("o'brien.txt")).await.unwrap(), 1);
    store.delete("kb", &ids).await.unwrap();
    assert_eq!(store.count("kb").await.unwrap(), 1);
}

#[tokio::test]
async fn preset_ids_are_replaced() {
    let tmp = TempDir::new().expect("tmp");
    let store = LanceCollectionStore::new(tmp.path());
    let ids = store.upsert("kb", sample()).await.unwrap();
    let mut replacement = chunk("battery bank sizing, revised", unit(4, 2), "energy.md", 2);
    replacement.id = Some(ids[2].clone());
    store.upsert("kb", vec![replacement]).await.unwrap();
    assert_eq!(store.count("kb").await.unwrap(), 3);
    let hits = store.search("kb", &unit(4, 2), 1).await.unwrap();
    assert_eq!(hits[0].text, "battery bank sizing, revised");
}

#[tokio::test]
async fn dimension_is_enforced_until_collection_is_empty() {
    let tmp = TempDir::new().expect("tmp");
    let store = LanceCollectionStore::new(tmp.path());
    store.upsert("kb", sample()).await.unwrap();

    let err = store.upsert("kb", vec![chunk("wide", unit(8, 0), "w.txt", 1)]).await.unwrap_err();
    assert!(matches!(err, Error::DimensionMismatch { expected: 4, actual: 8 }), "{err}");
    let err = store.search("kb", &unit(8, 0), 1).await.unwrap_err();
    assert!(matches!(err, Error::DimensionMismatch { expected: 4, actual: 8 }), "{err}");

    store.drop_collection("kb").await.unwrap();
    assert!(store.list_collections().await.unwrap().contains("kb"));
    assert_eq!(store.count("kb").await.unwrap(), 0);
    store.upsert("kb", vec![chunk("wide", unit(8, 0), "w.txt", 1)]).await.expect("empty collection adopts new dim");
    assert_eq!(store.count("kb").await.unwrap(), 1);
}

#[tokio::test]
async fn clear_keeps_collection_and_reset_wipes_everything() {
    let tmp = TempDir::new().expect("tmp");
    let store = LanceCollectionStore::new(tmp.path().join("db"));
    store.upsert("kb", sample()).await.unwrap();
    store.upsert("other", sample()).await.unwrap();

    assert_eq!(store.clear_collection("kb").await.unwrap(), 3);
    assert_eq!(store.count("kb").await.unwrap(), 0);
    assert!(store.search("kb", &unit(4, 0), 3).await.unwrap().is_empty());
    assert_eq!(store.list_collections().await.unwrap().len(), 2);

    store.reset_all().await.unwrap();
    assert!(store.list_collections().await.unwrap().is_empty());
    assert!(store.search("other", &unit(4, 0), 3).await.unwrap().is_empty());
    assert!(tmp.path().join("db").exists());

    store.upsert("kb", sample()).await.expect("usable after reset");
    assert_eq!(store.count("kb").await.unwrap(), 3);
}

#[tokio::test]
async fn concurrent_writers_do_not_lose_chunks() {
    let tmp = TempDir::new().expect("tmp");
    let store = LanceCollectionStore::new(tmp.path());
    let (a, b) = tokio::join!(store.upsert("kb", sample()), store.upsert("kb", sample()));
    a.unwrap();
    b.unwrap();
    assert_eq!(store.count("kb").await.unwrap(), 6);
}

#[tokio::test]
async fn rejects_bad_input() {
    let tmp = TempDir::new().expect("tmp");
    let store = LanceCollectionStore::new(tmp.path());
    assert!(matches!(store.upsert("../escape", sample()).await, Err(Error::InvalidInput(_))));
    let blank = chunk("   ", unit(4, 0), "x.txt", 1);
    assert!(matches!(store.upsert("kb", vec![blank]).await, Err(Error::InvalidInput(_))));
    let mixed = vec![chunk("a", unit(4, 0), "x.txt", 1), chunk("b", unit(3, 0), "x.txt", 1)];
    assert!(matches!(store.upsert("kb", mixed).await, Err(Error::DimensionMismatch { .. })));
    assert!(store.upsert("kb", Vec::new()).await.unwrap().is_empty());
}
