use std::sync::Arc;

use ndarray::{concatenate, Array1, Array2, Array3, ArrayView1, ArrayView2, ArrayView3, Axis};

use crate::error::{Error, Result};
use crate::PAD_IDX;

/// Encoder and decoder of a sequence-to-sequence model, run by some numeric backend.
///
/// Token batches are `[batch, length]` and padded; `lengths` holds the unpadded length of
/// each row.
pub trait NumericGraph: Send + Sync {
    /// Returns hidden states of shape `[batch, length, dim]`.
    fn encode(&self, tokens: ArrayView2<i64>, lengths: ArrayView1<i64>) -> anyhow::Result<Array3<f32>>;

    /// Returns logits of shape `[batch, vocabulary]` for the token following each row.
    fn decode(
        &self,
        tokens: ArrayView2<i64>,
        lengths: ArrayView1<i64>,
        encoded: ArrayView3<f32>,
        encoded_lengths: ArrayView1<i64>,
    ) -> anyhow::Result<Array2<f32>>;
}

/// Encoder hidden states with the source length of each row.
#[derive(Clone, Debug, PartialEq)]
pub struct EncoderOutput {
    pub hidden: Array3<f32>,
    pub lengths: Array1<i64>,
}

impl EncoderOutput {
    pub fn batch_size(&self) -> usize {
        self.hidden.len_of(Axis(0))
    }

    /// Tiles the whole output `n` times along the batch axis, at least once.
    pub fn repeat(&self, n: usize) -> EncoderOutput {
        let n = n.max(1);
        let hidden = vec![self.hidden.view(); n];
        let lengths = vec![self.lengths.view(); n];
        EncoderOutput {
            hidden: concatenate(Axis(0), &hidden).unwrap_or_else(|_| self.hidden.clone()),
            lengths: concatenate(Axis(0), &lengths).unwrap_or_else(|_| self.lengths.clone()),
        }
    }
}

/// Pads index sequences with `pad` to the longest one.
pub fn pad_batch(batch: &[Vec<usize>], pad: usize) -> (Array2<i64>, Array1<i64>) {
    let width = batch.iter().map(Vec::len).max().unwrap_or(0);
    let tokens = Array2::from_shape_fn((batch.len(), width), |(row, col)| {
        batch[row].get(col).copied().unwrap_or(pad) as i64
    });
    let lengths = batch.iter().map(|row| row.len() as i64).collect();
    (tokens, lengths)
}

/// Owns batching and padding around a [`NumericGraph`].
#[derive(Clone)]
pub struct NeuralModelRunner {
    graph: Arc<dyn NumericGraph>,
    pad_index: usize,
}

impl NeuralModelRunner {
    pub fn new(graph: Arc<dyn NumericGraph>) -> Self {
        Self {
            graph,
            pad_index: PAD_IDX,
        }
    }

    pub fn pad_index(&self) -> usize {
        self.pad_index
    }

    pub fn encode(&self, batch: &[Vec<usize>]) -> Result<EncoderOutput> {
        if batch.is_empty() {
            return Err(Error::InvalidInput("cannot encode an empty batch".into()));
        }
        let (tokens, lengths) = pad_batch(batch, self.pad_index);
        let hidden = self
            .graph
            .encode(tokens.view(), lengths.view())
            .map_err(Error::Backend)?;
        if hidden.len_of(Axis(0)) != batch.len() {
            return Err(Error::Backend(anyhow::anyhow!(
                "encoder returned {} rows for a batch of {}",
                hidden.len_of(Axis(0)),
                batch.len()
            )));
        }
        Ok(EncoderOutput { hidden, lengths })
    }

    /// Decodes every partial sequence against `encoded`. A single-row encoder output is tiled
    /// to the batch size, so one encoding serves any number of beams.
    pub fn decode(&self, batch: &[Vec<usize>], encoded: &EncoderOutput) -> Result<Array2<f32>> {
        if batch.is_empty() {
            return Err(Error::InvalidInput("cannot decode an empty batch".into()));
        }
        let tiled;
        let encoded = match encoded.batch_size() {
            n if n == batch.len() => encoded,
            1 => {
                tiled = encoded.repeat(batch.len());
                &tiled
            }
            n => {
                return Err(Error::InvalidInput(format!(
                    "encoder output has {} rows, decoder batch has {}",
                    n,
                    batch.len()
                )))
            }
        };

        let (tokens, lengths) = pad_batch(batch, self.pad_index);
        let logits = self
            .graph
            .decode(
                tokens.view(),
                lengths.view(),
                encoded.hidden.view(),
                encoded.lengths.view(),
            )
            .map_err(Error::Backend)?;
        if logits.nrows() != batch.len() {
            return Err(Error::Backend(anyhow::anyhow!(
                "decoder returned {} rows for a batch of {}",
                logits.nrows(),
                batch.len()
            )));
        }
        Ok(logits)
    }
}
