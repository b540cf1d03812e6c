//! Batch loaders over processed partitions.
use candle_core::{Device, Tensor};
use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::data_handling::Partition;
use crate::error::{BenchError, Result};
use crate::preprocessing::labels::Target;
use crate::preprocessing::ProcessedData;

/// Loss attached to a task; chosen once when the training loaders are built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Criterion {
    MeanSquaredError,
    CrossEntropy,
}

impl Criterion {
    pub fn for_task(is_regression: bool) -> Self {
        if is_regression {
            Criterion::MeanSquaredError
        } else {
            Criterion::CrossEntropy
        }
    }

    /// Mean loss over a batch. Regression outputs of shape `(b, 1)` are
    /// compared against targets of shape `(b,)`.
    pub fn loss(&self, output: &Tensor, target: &Tensor) -> Result<Tensor> {
        let loss = match self {
            Criterion::MeanSquaredError => {
                let output = if output.rank() == 2 {
                    output.squeeze(1)?
                } else {
                    output.clone()
                };
                candle_nn::loss::mse(&output, target)?
            }
            Criterion::CrossEntropy => candle_nn::loss::cross_entropy(output, target)?,
        };
        Ok(loss)
    }
}

/// One mini-batch on the target device.
#[derive(Debug, Clone)]
pub struct Batch {
    /// `(b, d_in)` float tensor; `d_in` may be zero.
    pub x_num: Tensor,
    /// `(b, n_cat)` u32 category codes, only under the `indices` policy.
    pub x_cat: Option<Tensor>,
    /// `(b,)` f64 targets for regression or u32 class indices.
    pub y: Tensor,
    pub size: usize,
}

pub struct Loader {
    x_num: Array2<f64>,
    x_cat: Option<Array2<usize>>,
    y: Target,
    batch_size: usize,
    shuffle: bool,
    rng: StdRng,
    device: Device,
}

impl Loader {
    pub fn new(
        x_num: Array2<f64>,
        x_cat: Option<Array2<usize>>,
        y: Target,
        batch_size: usize,
        shuffle: bool,
        seed: u64,
        device: Device,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(BenchError::InvalidConfig("batch_size must be > 0".into()));
        }
        if x_num.nrows() != y.len() || x_cat.as_ref().map_or(false, |c| c.nrows() != y.len()) {
            return Err(BenchError::InvalidData(format!(
                "loader inputs disagree on row count: N = {}, y = {}",
                x_num.nrows(),
                y.len()
            )));
        }
        Ok(Loader {
            x_num,
            x_cat,
            y,
            batch_size,
            shuffle,
            rng: StdRng::seed_from_u64(seed),
            device,
        })
    }

    pub fn n_samples(&self) -> usize {
        self.y.len()
    }

    /// Number of batches per epoch; the last batch may be short.
    pub fn len(&self) -> usize {
        (self.n_samples() + self.batch_size - 1) / self.batch_size
    }

    pub fn is_empty(&self) -> bool {
        self.n_samples() == 0
    }

    pub fn has_categorical(&self) -> bool {
        self.x_cat.is_some()
    }

    pub fn n_num_features(&self) -> usize {
        self.x_num.ncols()
    }

    /// Targets in storage order, which is the batch order of an unshuffled loader.
    pub fn targets(&self) -> &Target {
        &self.y
    }

    fn order(&mut self) -> Vec<usize> {
        let mut idx: Vec<usize> = (0..self.n_samples()).collect();
        if self.shuffle {
            idx.shuffle(&mut self.rng);
        }
        idx
    }

    /// Iterate one epoch. Shuffled loaders draw a new permutation per call
    /// from the seeded generator, so the sequence of epochs is reproducible.
    pub fn epoch(&mut self) -> Batches<'_> {
        let order = self.order();
        Batches {
            loader: self,
            order,
            pos: 0,
        }
    }

    /// Two independent passes over the same partition, zipped batch by batch.
    pub fn paired_epoch(&mut self) -> impl Iterator<Item = Result<(Batch, Batch)>> + '_ {
        let first = self.order();
        let second = self.order();
        let loader: &Loader = self;
        Batches {
            loader,
            order: first,
            pos: 0,
        }
        .zip(Batches {
            loader,
            order: second,
            pos: 0,
        })
        .map(|(a, b)| Ok((a?, b?)))
    }

    fn batch(&self, idx: &[usize]) -> Result<Batch> {
        let b = idx.len();
        let rows = self.x_num.select(Axis(0), idx);
        let d = rows.ncols();
        let x_num = Tensor::from_vec(rows.iter().copied().collect::<Vec<f64>>(), (b, d), &self.device)?;
        let x_cat = match &self.x_cat {
            Some(c) => {
                let rows = c.select(Axis(0), idx);
                let k = rows.ncols();
                let codes: Vec<u32> = rows.iter().map(|&v| v as u32).collect();
                Some(Tensor::from_vec(codes, (b, k), &self.device)?)
            }
            None => None,
        };
        let y = match &self.y {
            Target::Continuous(y) => {
                Tensor::from_vec(idx.iter().map(|&i| y[i]).collect::<Vec<f64>>(), b, &self.device)?
            }
            Target::Classes(y) => {
                Tensor::from_vec(idx.iter().map(|&i| y[i] as u32).collect::<Vec<u32>>(), b, &self.device)?
            }
        };
        Ok(Batch {
            x_num,
            x_cat,
            y,
            size: b,
        })
    }
}

pub struct Batches<'a> {
    loader: &'a Loader,
    order: Vec<usize>,
    pos: usize,
}

impl<'a> Iterator for Batches<'a> {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.order.len() {
            return None;
        }
        let end = (self.pos + self.loader.batch_size).min(self.order.len());
        let batch = self.loader.batch(&self.order[self.pos..end]);
        self.pos = end;
        Some(batch)
    }
}

pub enum Loaders {
    /// Shuffled train loader and ordered validation loader.
    Train { train: Loader, val: Loader },
    /// Ordered loader over a single inference partition.
    Inference(Loader),
}

/// Build loaders from processed partitions.
///
/// In training mode the criterion matching the task is returned alongside
/// shuffled train and ordered val loaders. In inference mode a single
/// ordered loader covers the partition chosen by
/// [`ProcessedData::inference_partition`].
pub fn build(
    is_regression: bool,
    data: &ProcessedData,
    device: &Device,
    batch_size: usize,
    is_train: bool,
    seed: u64,
) -> Result<(Loaders, Option<Criterion>)> {
    let make = |part: Partition, shuffle: bool| -> Result<Loader> {
        let y = data.y.get(&part).ok_or_else(|| {
            BenchError::InvalidData(format!("processed data has no {} partition", part))
        })?;
        Loader::new(
            data.n[&part].clone(),
            data.c.as_ref().and_then(|c| c.get(&part).cloned()),
            y.clone(),
            batch_size,
            shuffle,
            seed,
            device.clone(),
        )
    };

    if is_train {
        let train = make(Partition::Train, true)?;
        let val = make(Partition::Val, false)?;
        log::debug!(
            "Built loaders: {} train batches, {} val batches (batch size {})",
            train.len(),
            val.len(),
            batch_size
        );
        Ok((Loaders::Train { train, val }, Some(Criterion::for_task(is_regression))))
    } else {
        let part = data.inference_partition()?;
        Ok((Loaders::Inference(make(part, false)?), None))
    }
}

/// Stack `(b, k)` tensors from an ordered pass back into an ndarray matrix.
pub fn collect_rows(chunks: &[Tensor]) -> Result<Array2<f64>> {
    let mut rows = 0;
    let mut cols = 0;
    let mut flat = Vec::new();
    for t in chunks {
        let t = if t.rank() == 1 { t.unsqueeze(1)? } else { t.clone() };
        let (b, k) = t.dims2()?;
        rows += b;
        cols = k;
        flat.extend(t.flatten_all()?.to_vec1::<f64>()?);
    }
    Ok(Array2::from_shape_vec((rows, cols), flat)?)
}
