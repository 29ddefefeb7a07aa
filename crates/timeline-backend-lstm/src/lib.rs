//! CPU forward pass for the Embedding → LSTM (stacked) → Dense/softmax
//! next-event model.
//!
//! Weights come from a JSON export of the trained Keras layers:
//!
//! ```text
//! {
//!   "mask_zero": true,
//!   "embedding": [[f32; dim]; vocab_in],
//!   "lstm": [{ "kernel": [[f32; 4u]; in], "recurrent_kernel": [[f32; 4u]; u],
//!              "bias": [f32; 4u], "recurrent_activation": "sigmoid" }, ...],
//!   "dense": { "kernel": [[f32; vocab]; u], "bias": [f32; vocab] }
//! }
//! ```
//!
//! Gate blocks follow the Keras layout `[input, forget, cell, output]`.

use std::path::Path;

use ndarray::{s, Array1, Array2, ArrayView1};
use serde::Deserialize;
use timeline_backend::InferenceBackend;
use timeline_common::{Result, TimelineError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrentActivation {
    #[default]
    Sigmoid,
    /// `clip(0.2x + 0.5, 0, 1)`, the Keras 2 default.
    HardSigmoid,
}

impl RecurrentActivation {
    fn apply(self, x: f32) -> f32 {
        match self {
            RecurrentActivation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            RecurrentActivation::HardSigmoid => (0.2 * x + 0.5).clamp(0.0, 1.0),
        }
    }
}

#[derive(Deserialize)]
struct WeightFile {
    #[serde(default)]
    mask_zero: bool,
    embedding: Vec<Vec<f32>>,
    lstm: Vec<LstmWeights>,
    dense: DenseWeights,
}

#[derive(Deserialize)]
struct LstmWeights {
    kernel: Vec<Vec<f32>>,
    recurrent_kernel: Vec<Vec<f32>>,
    bias: Vec<f32>,
    #[serde(default)]
    recurrent_activation: RecurrentActivation,
}

#[derive(Deserialize)]
struct DenseWeights {
    kernel: Vec<Vec<f32>>,
    bias: Vec<f32>,
}

fn matrix(name: &str, rows: Vec<Vec<f32>>) -> Result<Array2<f32>> {
    let n = rows.len();
    let m = rows.first().map(Vec::len).unwrap_or(0);
    if n == 0 || m == 0 {
        return Err(TimelineError::Model(format!("{name} is empty")));
    }
    if let Some(bad) = rows.iter().position(|r| r.len() != m) {
        return Err(TimelineError::Model(format!("{name} row {bad} has {} columns, expected {m}", rows[bad].len())));
    }
    let flat: Vec<f32> = rows.into_iter().flatten().collect();
    Array2::from_shape_vec((n, m), flat).map_err(|e| TimelineError::Model(format!("{name}: {e}")))
}

#[derive(Debug, Clone)]
struct LstmLayer {
    kernel: Array2<f32>,
    recurrent_kernel: Array2<f32>,
    bias: Array1<f32>,
    units: usize,
    activation: RecurrentActivation,
}

impl LstmLayer {
    fn from_weights(index: usize, input_dim: usize, w: LstmWeights) -> Result<Self> {
        let kernel = matrix(&format!("lstm[{index}].kernel"), w.kernel)?;
        let recurrent_kernel = matrix(&format!("lstm[{index}].recurrent_kernel"), w.recurrent_kernel)?;
        if kernel.ncols() % 4 != 0 {
            return Err(TimelineError::Model(format!(
                "lstm[{index}].kernel has {} columns, not a multiple of 4",
                kernel.ncols()
            )));
        }
        let units = kernel.ncols() / 4;
        if kernel.nrows() != input_dim {
            return Err(TimelineError::Model(format!(
                "lstm[{index}].kernel expects inputs of width {}, previous layer produces {input_dim}",
                kernel.nrows()
            )));
        }
        if recurrent_kernel.dim() != (units, 4 * units) {
            return Err(TimelineError::Model(format!(
                "lstm[{index}].recurrent_kernel is {:?}, expected {:?}",
                recurrent_kernel.dim(),
                (units, 4 * units)
            )));
        }
        if w.bias.len() != 4 * units {
            return Err(TimelineError::Model(format!(
                "lstm[{index}].bias has {} entries, expected {}",
                w.bias.len(),
                4 * units
            )));
        }
        Ok(Self { kernel, recurrent_kernel, bias: Array1::from(w.bias), units, activation: w.recurrent_activation })
    }

    fn step(&self, x: ArrayView1<f32>, h: &mut Array1<f32>, c: &mut Array1<f32>) {
        let u = self.units;
        let act = self.activation;
        let z = x.dot(&self.kernel) + h.dot(&self.recurrent_kernel) + &self.bias;
        let i = z.slice(s![..u]).mapv(|v| act.apply(v));
        let f = z.slice(s![u..2 * u]).mapv(|v| act.apply(v));
        let g = z.slice(s![2 * u..3 * u]).mapv(f32::tanh);
        let o = z.slice(s![3 * u..]).mapv(|v| act.apply(v));
        let c_next = &f * &*c + &i * &g;
        *h = &o * &c_next.mapv(f32::tanh);
        *c = c_next;
    }
}

#[derive(Debug, Clone)]
pub struct LstmBackend {
    embedding: Array2<f32>,
    layers: Vec<LstmLayer>,
    dense_kernel: Array2<f32>,
    dense_bias: Array1<f32>,
    mask_zero: bool,
}

impl LstmBackend {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let backend = Self::from_json_str(&text)?;
        tracing::info!(
            target: "backend",
            "loaded lstm model from {} ({} layers, {} outputs)",
            path.display(),
            backend.layers.len(),
            backend.vocab_size()
        );
        Ok(backend)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let file: WeightFile = serde_json::from_str(text)
            .map_err(|e| TimelineError::Model(format!("unreadable weight file: {e}")))?;
        Self::from_weights(file)
    }

    fn from_weights(file: WeightFile) -> Result<Self> {
        let embedding = matrix("embedding", file.embedding)?;
        if file.lstm.is_empty() {
            return Err(TimelineError::Model("model has no lstm layers".into()));
        }
        let mut layers = Vec::with_capacity(file.lstm.len());
        let mut width = embedding.ncols();
        for (index, w) in file.lstm.into_iter().enumerate() {
            let layer = LstmLayer::from_weights(index, width, w)?;
            width = layer.units;
            layers.push(layer);
        }
        let dense_kernel = matrix("dense.kernel", file.dense.kernel)?;
        if dense_kernel.nrows() != width {
            return Err(TimelineError::Model(format!(
                "dense.kernel expects inputs of width {}, last lstm layer produces {width}",
                dense_kernel.nrows()
            )));
        }
        if file.dense.bias.len() != dense_kernel.ncols() {
            return Err(TimelineError::Model(format!(
                "dense.bias has {} entries, expected {}",
                file.dense.bias.len(),
                dense_kernel.ncols()
            )));
        }
        Ok(Self {
            embedding,
            layers,
            dense_kernel,
            dense_bias: Array1::from(file.dense.bias),
            mask_zero: file.mask_zero,
        })
    }

    fn final_hidden(&self, sequence: &[u32]) -> Result<Array1<f32>> {
        let mut states: Vec<(Array1<f32>, Array1<f32>)> = self
            .layers
            .iter()
            .map(|l| (Array1::zeros(l.units), Array1::zeros(l.units)))
            .collect();
        for &id in sequence {
            // masked steps carry the previous state forward untouched
            if self.mask_zero && id == 0 {
                continue;
            }
            if id as usize >= self.embedding.nrows() {
                return Err(TimelineError::inference(format!(
                    "token id {id} outside embedding table of {} rows",
                    self.embedding.nrows()
                )));
            }
            let mut x = self.embedding.row(id as usize).to_owned();
            for (layer, (h, c)) in self.layers.iter().zip(states.iter_mut()) {
                layer.step(x.view(), h, c);
                x = h.clone();
            }
        }
        states
            .pop()
            .map(|(h, _)| h)
            .ok_or_else(|| TimelineError::inference("model has no lstm layers"))
    }
}

fn softmax(logits: Array1<f32>) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp = logits.mapv(|l| (l - max).exp());
    let sum = exp.sum();
    exp.iter().map(|e| e / sum).collect()
}

impl InferenceBackend for LstmBackend {
    fn name(&self) -> &str { "lstm" }

    fn vocab_size(&self) -> usize { self.dense_kernel.ncols() }

    fn predict(&self, sequence: &[u32]) -> Result<Vec<f32>> {
        let h = self.final_hidden(sequence)?;
        let logits = h.dot(&self.dense_kernel) + &self.dense_bias;
        Ok(softmax(logits))
    }
}
