use kbase_core::config::{EmbeddingProvider, EmbeddingSettings};
use kbase_core::Embedder;
use kbase_embed::{get_default_embedder, HashedEmbedder};

fn cosine(a: &[f32], b: &[f32]) -> f32 { a.iter().zip(b).map(|(x, y)| x * y).sum() }

#[test]
fn hashed_embedder_shapes_and_determinism() {
    let settings = EmbeddingSettings { provider: EmbeddingProvider::Hashed, ..EmbeddingSettings::default() };
    let embedder = get_default_embedder(&settings).expect("embedder");
    let texts = vec!["hello world".to_string(), "hello world".to_string()];
    let embs = embedder.embed_batch(&texts).expect("embed_batch");
    let (v1, v2) = (&embs[0], &embs[1]);

    assert_eq!(v1.len(), 1024, "embedding dim is 1024");
    assert_eq!(embedder.dim(), 1024);

    let norm: f32 = v1.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() <= 1e-3, "vector is L2-normalized (norm={norm})");

    for (a, b) in v1.iter().zip(v2.iter()) { assert!((a - b).abs() <= 1e-6); }
}

#[test]
fn missing_model_dir_is_a_config_error() {
    let settings = EmbeddingSettings {
        provider: EmbeddingProvider::Local,
        model_dir: Some("/definitely/not/here".into()),
        ..EmbeddingSettings::default()
    };
    assert!(matches!(get_default_embedder(&settings), Err(kbase_core::Error::InvalidConfig(_))));
}

#[test]
fn shared_words_score_higher() {
    let embedder = HashedEmbedder::new(1024).unwrap();
    let query = embedder.embed_text("vector database search");
    let near = embedder.embed_text("a database that supports vector search");
    let far = embedder.embed_text("bread recipes for the weekend");
    assert!(cosine(&query, &near) > cosine(&query, &far));
}

#[test]
fn chinese_question_matches_its_topic() {
    let embedder = HashedEmbedder::new(1024).unwrap();
    let ml = embedder.embed_text("机器学习是人工智能的一个子领域，它使计算机能够在没有明确编程的情况下学习。");
    let cooking = embedder.embed_text("红烧肉需要先焯水，再加冰糖慢火炖煮一个小时。");
    let q = embedder.embed("什么是机器学习").unwrap();
    assert!(cosine(&q, &ml) > cosine(&q, &cooking));
}
