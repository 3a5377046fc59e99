//! Dense feedforward network with logistic activations.
//!
//! Weights are one matrix per layer transition, `W_i` shaped
//! `(topology[i + 1], topology[i])`. Inference is `a_{i+1} = σ(W_i · a_i)`;
//! training is a single online backpropagation step on squared error.
//! Networks own their matrices outright, so `clone()` is a full deep copy.

pub mod dataset;
pub mod snapshot;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::matrix::{CpuKernel, DotKernel, Matrix, MatrixError};

pub use snapshot::{NetworkSnapshot, SnapshotError};

#[derive(Clone, Debug, PartialEq, Error)]
pub enum NetworkError {
    #[error("topology needs at least two layers, got {0}")]
    TooFewLayers(usize),
    #[error("layer {0} has no neurons")]
    EmptyLayer(usize),
    #[error("learning rate must be finite, got {0}")]
    InvalidLearningRate(f32),
    #[error("{what} has {actual} values, network expects {expected}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("weight matrix {layer} is {actual:?}, topology requires {expected:?}")]
    LayerShape {
        layer: usize,
        expected: (usize, usize),
        actual: (usize, usize),
    },
}

/// Check a topology: at least an input and an output layer, none empty.
pub fn validate_topology(topology: &[usize]) -> Result<(), NetworkError> {
    if topology.len() < 2 {
        return Err(NetworkError::TooFewLayers(topology.len()));
    }
    if let Some(index) = topology.iter().position(|&n| n == 0) {
        return Err(NetworkError::EmptyLayer(index));
    }
    Ok(())
}

pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Index of the largest output; the first maximum wins.
pub fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] {
            best = i;
        }
    }
    best
}

/// Matrix shapes inside a network are derived from its topology; a mismatch
/// here is a bug, not an input error.
fn internal<T>(result: Result<T, MatrixError>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => panic!("network shape invariant violated: {err}"),
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(into = "NetworkSnapshot", try_from = "NetworkSnapshot")]
pub struct Network {
    topology: Vec<usize>,
    learning_rate: f32,
    weights: Vec<Matrix>,
}

impl Network {
    /// Random network: every weight uniform in `[-0.5, 0.5)`.
    pub fn new<R: Rng + ?Sized>(
        learning_rate: f32,
        topology: &[usize],
        rng: &mut R,
    ) -> Result<Self, NetworkError> {
        validate_topology(topology)?;
        if !learning_rate.is_finite() {
            return Err(NetworkError::InvalidLearningRate(learning_rate));
        }
        let weights = topology
            .windows(2)
            .map(|pair| {
                let mut w = Matrix::new(pair[1], pair[0]);
                for cell in w.as_mut_slice() {
                    *cell = rng.random::<f32>() - 0.5;
                }
                w
            })
            .collect();
        Ok(Self {
            topology: topology.to_vec(),
            learning_rate,
            weights,
        })
    }

    /// Assemble from existing matrices, checking each against the topology.
    pub fn from_parts(
        learning_rate: f32,
        topology: Vec<usize>,
        weights: Vec<Matrix>,
    ) -> Result<Self, NetworkError> {
        validate_topology(&topology)?;
        if !learning_rate.is_finite() {
            return Err(NetworkError::InvalidLearningRate(learning_rate));
        }
        if weights.len() != topology.len() - 1 {
            return Err(NetworkError::ShapeMismatch {
                what: "weight list",
                expected: topology.len() - 1,
                actual: weights.len(),
            });
        }
        for (layer, (w, pair)) in weights.iter().zip(topology.windows(2)).enumerate() {
            let expected = (pair[1], pair[0]);
            if w.shape() != expected {
                return Err(NetworkError::LayerShape {
                    layer,
                    expected,
                    actual: w.shape(),
                });
            }
        }
        Ok(Self {
            topology,
            learning_rate,
            weights,
        })
    }

    pub fn topology(&self) -> &[usize] {
        &self.topology
    }

    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }

    pub fn weights(&self) -> &[Matrix] {
        &self.weights
    }

    pub fn input_len(&self) -> usize {
        self.topology[0]
    }

    pub fn output_len(&self) -> usize {
        self.topology[self.topology.len() - 1]
    }

    /// Total number of weight cells across all layers.
    pub fn weight_count(&self) -> usize {
        self.weights.iter().map(Matrix::len).sum()
    }

    pub fn query(&self, input: &[f32]) -> Result<Vec<f32>, NetworkError> {
        self.query_with(&CpuKernel, input)
    }

    pub fn query_with(&self, kernel: &dyn DotKernel, input: &[f32]) -> Result<Vec<f32>, NetworkError> {
        self.check_len("input", self.input_len(), input.len())?;
        let mut activations = self.feed_forward(kernel, input);
        let output = activations.pop().unwrap_or_else(|| Matrix::from_column(input));
        Ok(internal(output.to_vec()))
    }

    pub fn train(&mut self, input: &[f32], target: &[f32]) -> Result<(), NetworkError> {
        self.train_with(&CpuKernel, input, target)
    }

    /// One online backpropagation step.
    ///
    /// Each layer's propagated error is computed from the weights as they were
    /// before that layer's update.
    pub fn train_with(
        &mut self,
        kernel: &dyn DotKernel,
        input: &[f32],
        target: &[f32],
    ) -> Result<(), NetworkError> {
        self.check_len("input", self.input_len(), input.len())?;
        self.check_len("target", self.output_len(), target.len())?;

        let activations = self.feed_forward(kernel, input);
        let output = internal(activations[activations.len() - 1].to_vec());
        let error: Vec<f32> = target.iter().zip(&output).map(|(t, o)| t - o).collect();
        let mut error = Matrix::from_column(&error);

        for i in (0..self.weights.len()).rev() {
            let out = &activations[i + 1];
            let gradient = internal(internal(error.hadamard(out)).hadamard(&(1.0 - out)));
            let delta =
                internal(kernel.dot(&gradient, &activations[i].transpose())) * self.learning_rate;
            let propagated = internal(kernel.dot(&self.weights[i].transpose(), &error));
            internal(self.weights[i].add_assign_elementwise(&delta));
            error = propagated;
        }
        Ok(())
    }

    /// Perturb weights: each cell independently with probability `rate`
    /// receives `±strength·U`, `U ~ [0, 1)`, sign chosen uniformly.
    pub fn mutate<R: Rng + ?Sized>(&mut self, rate: f32, strength: f32, rng: &mut R) {
        for w in &mut self.weights {
            for cell in w.as_mut_slice() {
                if rng.random::<f32>() < rate {
                    let magnitude = strength * rng.random::<f32>();
                    if rng.random_bool(0.5) {
                        *cell += magnitude;
                    } else {
                        *cell -= magnitude;
                    }
                }
            }
        }
    }

    fn check_len(&self, what: &'static str, expected: usize, actual: usize) -> Result<(), NetworkError> {
        if expected != actual {
            return Err(NetworkError::ShapeMismatch {
                what,
                expected,
                actual,
            });
        }
        Ok(())
    }

    /// Activations of every layer, input first.
    fn feed_forward(&self, kernel: &dyn DotKernel, input: &[f32]) -> Vec<Matrix> {
        let mut activations = Vec::with_capacity(self.weights.len() + 1);
        activations.push(Matrix::from_column(input));
        for w in &self.weights {
            let previous = &activations[activations.len() - 1];
            let next = internal(kernel.dot(w, previous)).map(sigmoid);
            activations.push(next);
        }
        activations
    }
}
