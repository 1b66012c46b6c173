use anyhow::{anyhow, Result};
use candle_core::{Device, Tensor};
use tokenizers::Tokenizer;

/// Encodes a batch padded to its longest member (capped at `max_len`).
/// Returns `(input_ids, attention_mask)`, both `[B, T]`.
pub fn tokenize_batch(tokenizer: &Tokenizer, texts: &[String], max_len: usize, pad_id: u32, device: &Device) -> Result<(Tensor, Tensor)> {
    let encodings = texts
        .iter()
        .map(|t| tokenizer.encode(t.as_str(), true).map_err(|e| anyhow!("Tokenization failed: {}", e)))
        .collect::<Result<Vec<_>>>()?;
    let seq_len = encodings.iter().map(|e| e.get_ids().len().min(max_len)).max().unwrap_or(0).max(1);

    let mut ids = Vec::with_capacity(texts.len() * seq_len);
    let mut mask = Vec::with_capacity(texts.len() * seq_len);
    for enc in &encodings {
        let take = enc.get_ids().len().min(seq_len);
        ids.extend_from_slice(&enc.get_ids()[..take]);
        mask.extend_from_slice(&enc.get_attention_mask()[..take]);
        ids.extend(std::iter::repeat(pad_id).take(seq_len - take));
        mask.extend(std::iter::repeat(0).take(seq_len - take));
    }
    let input_ids = Tensor::from_vec(ids, (texts.len(), seq_len), device)?;
    let attention_mask = Tensor::from_vec(mask, (texts.len(), seq_len), device)?;
    Ok((input_ids, attention_mask))
}
