use anyhow::{ensure, Result};
use candle_core::{DType, Tensor, D};

/// Sentence vectors from token states: average the `[B, T, H]` hidden states
/// over the positions the `[B, T]` attention mask keeps, then scale each row
/// to unit length. Returns `[B, H]`.
pub fn masked_mean_l2(hidden: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
    let (batch, _, width) = hidden.dims3()?;
    ensure!(
        attention_mask.dims2()? == (batch, hidden.dim(1)?),
        "attention mask {:?} does not cover hidden states {:?}",
        attention_mask.dims(),
        hidden.dims()
    );

    let weights = attention_mask.to_device(hidden.device())?.to_dtype(hidden.dtype())?;
    let summed = hidden.broadcast_mul(&weights.unsqueeze(D::Minus1)?)?.sum(1)?;
    // A row with every token masked keeps a zero sum instead of dividing by zero.
    let kept = weights.sum_keepdim(1)?.maximum(1.0)?;
    let mean = summed.broadcast_div(&kept)?;

    let floor = if hidden.dtype() == DType::F16 { 1e-6 } else { 1e-12 };
    let norm = mean.sqr()?.sum_keepdim(1)?.sqrt()?.maximum(floor)?;
    let pooled = mean.broadcast_div(&norm)?;
    ensure!(pooled.dims() == [batch, width], "pooled shape {:?}", pooled.dims());
    Ok(pooled)
}
