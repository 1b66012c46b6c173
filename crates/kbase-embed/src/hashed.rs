use std::hash::Hasher;

use twox_hash::XxHash64;

use kbase_core::{Embedder, Error};

/// Deterministic bag-of-features embedder.
///
/// Latin-script words hash as whole lowercase words; CJK runs hash every
/// character and every adjacent character pair, since they carry no spaces.
/// Vectors are L2 normalised, so cosine distance ranks texts by shared
/// features. Needs no model files.
pub struct HashedEmbedder {
    dim: usize,
    model_id: String,
}

impl HashedEmbedder {
    pub fn new(dim: usize) -> kbase_core::Result<Self> {
        if dim == 0 {
            return Err(Error::InvalidConfig("hashed embedder needs a positive dimension".into()));
        }
        Ok(Self { dim, model_id: format!("hashed-xxh64-{dim}") })
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        for feature in features(text) {
            let mut hasher = XxHash64::with_seed(0);
            hasher.write(feature.as_bytes());
            #[allow(clippy::cast_possible_truncation)]
            let idx = (hasher.finish() % self.dim as u64) as usize;
            v[idx] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-6);
        for x in &mut v { *x /= norm; }
        v
    }
}

impl Embedder for HashedEmbedder {
    fn model_id(&self) -> &str { &self.model_id }

    fn dim(&self) -> usize { self.dim }

    fn embed_batch(&self, texts: &[String]) -> kbase_core::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32, 0x3400..=0x9FFF | 0xF900..=0xFAFF | 0x3040..=0x30FF | 0xAC00..=0xD7AF)
}

fn features(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut word = String::new();
    let mut run: Vec<char> = Vec::new();

    let flush_word = |word: &mut String, out: &mut Vec<String>| {
        if !word.is_empty() { out.push(std::mem::take(word)); }
    };
    let flush_run = |run: &mut Vec<char>, out: &mut Vec<String>| {
        out.extend(run.iter().map(char::to_string));
        out.extend(run.windows(2).map(|w| w.iter().collect::<String>()));
        run.clear();
    };

    for c in text.chars().flat_map(char::to_lowercase) {
        if is_cjk(c) {
            flush_word(&mut word, &mut out);
            run.push(c);
        } else if c.is_alphanumeric() {
            flush_run(&mut run, &mut out);
            word.push(c);
        } else {
            flush_word(&mut word, &mut out);
            flush_run(&mut run, &mut out);
        }
    }
    flush_word(&mut word, &mut out);
    flush_run(&mut run, &mut out);
    out
}
