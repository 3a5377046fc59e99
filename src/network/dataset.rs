//! Labelled CSV datasets for supervised training and classification accuracy.
//!
//! Each row is `label,x1,x2,...`: a class index followed by raw feature values
//! (pixel intensities for MNIST-style files). Features are scaled into
//! `[0.01, 1.0]` as `x / input_max * 0.99 + 0.01` so no input is exactly zero,
//! and targets are one-hot with `0.01` for the off classes and `1.0` for the
//! labelled one.

use std::path::Path;

use thiserror::Error;

use super::{argmax, Network, NetworkError};
use crate::matrix::DotKernel;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },
    #[error("line {line}: label {label} is outside 0..{classes}")]
    Label { line: usize, label: usize, classes: usize },
    #[error("line {line}: {actual} features, expected {expected}")]
    Width { line: usize, expected: usize, actual: usize },
    #[error("dataset has no rows")]
    Empty,
    #[error(transparent)]
    Network(#[from] NetworkError),
}

/// How raw rows are read and scaled.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CsvFormat {
    pub classes: usize,
    /// Largest raw feature value; 255 for 8-bit pixels.
    pub input_max: f32,
}

impl Default for CsvFormat {
    fn default() -> Self {
        Self {
            classes: 10,
            input_max: 255.0,
        }
    }
}

impl CsvFormat {
    pub fn scale(&self, raw: f32) -> f32 {
        raw / self.input_max * 0.99 + 0.01
    }

    pub fn one_hot(&self, label: usize) -> Vec<f32> {
        let mut target = vec![0.01; self.classes];
        if let Some(cell) = target.get_mut(label) {
            *cell = 1.0;
        }
        target
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub label: usize,
    /// Scaled features.
    pub inputs: Vec<f32>,
}

#[derive(Clone, Debug)]
pub struct Dataset {
    format: CsvFormat,
    width: usize,
    samples: Vec<Sample>,
}

impl Dataset {
    /// Parse CSV text. Blank lines are skipped; every other row must have the
    /// same number of features as the first.
    pub fn parse_csv(text: &str, format: CsvFormat) -> Result<Self, DatasetError> {
        if format.classes == 0 {
            return Err(DatasetError::Parse {
                line: 0,
                message: "at least one class is required".into(),
            });
        }
        if !(format.input_max.is_finite() && format.input_max > 0.0) {
            return Err(DatasetError::Parse {
                line: 0,
                message: format!("input_max must be positive, got {}", format.input_max),
            });
        }
        let mut samples = Vec::new();
        let mut width = None;
        for (i, row) in text.lines().enumerate() {
            let line = i + 1;
            let row = row.trim();
            if row.is_empty() {
                continue;
            }
            let mut fields = row.split(',').map(str::trim);
            let label = parse_label(fields.next().unwrap_or(""), line)?;
            if label >= format.classes {
                return Err(DatasetError::Label {
                    line,
                    label,
                    classes: format.classes,
                });
            }
            let inputs = fields
                .map(|field| {
                    field.parse::<f32>().map(|raw| format.scale(raw)).map_err(|_| DatasetError::Parse {
                        line,
                        message: format!("bad feature value {field:?}"),
                    })
                })
                .collect::<Result<Vec<f32>, _>>()?;
            let expected = *width.get_or_insert(inputs.len());
            if inputs.len() != expected || expected == 0 {
                return Err(DatasetError::Width {
                    line,
                    expected,
                    actual: inputs.len(),
                });
            }
            samples.push(Sample { label, inputs });
        }
        let width = width.ok_or(DatasetError::Empty)?;
        Ok(Self {
            format,
            width,
            samples,
        })
    }

    pub fn load(path: &Path, format: CsvFormat) -> Result<Self, DatasetError> {
        let text = std::fs::read_to_string(path).map_err(|source| DatasetError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse_csv(&text, format)
    }

    pub fn format(&self) -> CsvFormat {
        self.format
    }

    /// Features per sample.
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// One pass over every row in file order, one online training step each.
    pub fn train_epoch(&self, network: &mut Network, kernel: &dyn DotKernel) -> Result<(), DatasetError> {
        self.check_network(network)?;
        for sample in &self.samples {
            network.train_with(kernel, &sample.inputs, &self.format.one_hot(sample.label))?;
        }
        Ok(())
    }

    /// Rows whose argmax output matches the label.
    pub fn correct(&self, network: &Network, kernel: &dyn DotKernel) -> Result<usize, DatasetError> {
        self.check_network(network)?;
        let mut correct = 0;
        for sample in &self.samples {
            let output = network.query_with(kernel, &sample.inputs)?;
            if argmax(&output) == sample.label {
                correct += 1;
            }
        }
        Ok(correct)
    }

    /// Fraction of rows classified correctly, in `[0, 1]`.
    pub fn accuracy(&self, network: &Network, kernel: &dyn DotKernel) -> Result<f64, DatasetError> {
        Ok(self.correct(network, kernel)? as f64 / self.samples.len() as f64)
    }

    fn check_network(&self, network: &Network) -> Result<(), DatasetError> {
        if network.input_len() != self.width {
            return Err(NetworkError::ShapeMismatch {
                what: "dataset features",
                expected: network.input_len(),
                actual: self.width,
            }
            .into());
        }
        if network.output_len() != self.format.classes {
            return Err(NetworkError::ShapeMismatch {
                what: "dataset classes",
                expected: network.output_len(),
                actual: self.format.classes,
            }
            .into());
        }
        Ok(())
    }
}

fn parse_label(field: &str, line: usize) -> Result<usize, DatasetError> {
    let value: f64 = field.parse().map_err(|_| DatasetError::Parse {
        line,
        message: format!("bad label {field:?}"),
    })?;
    if value < 0.0 || value.fract() != 0.0 || !value.is_finite() {
        return Err(DatasetError::Parse {
            line,
            message: format!("label {field:?} is not a class index"),
        });
    }
    Ok(value as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::CpuKernel;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    /// Three classes over four "pixels": the labelled pixel is bright, the
    /// rest are dim with some noise.
    const TRAIN: &str = "\
0,250,12,3,40
1,8,240,25,10
2,15,5,230,35
0,220,30,18,5
1,20,255,4,28
2,2,22,245,12
0,235,4,30,22
1,35,210,10,3
2,28,14,250,6
0,245,25,9,14
1,12,228,33,19
2,6,31,225,27
";

    const TEST: &str = "\
0,230,20,10,30
1,10,235,15,20
2,20,10,240,15
0,240,5,25,10
1,25,245,20,5
2,15,30,220,25
";

    fn format() -> CsvFormat {
        CsvFormat {
            classes: 3,
            input_max: 255.0,
        }
    }

    #[test]
    fn scales_inputs_and_builds_one_hot_targets() {
        let data = Dataset::parse_csv("2,0,255,127.5\n", format()).unwrap();
        assert_eq!(data.width(), 3);
        let sample = &data.samples()[0];
        assert_eq!(sample.label, 2);
        assert!((sample.inputs[0] - 0.01).abs() < 1e-6);
        assert!((sample.inputs[1] - 1.0).abs() < 1e-6);
        assert!((sample.inputs[2] - 0.505).abs() < 1e-6);
        assert_eq!(format().one_hot(1), vec![0.01, 1.0, 0.01]);
    }

    #[test]
    fn skips_blank_lines_and_accepts_float_labels() {
        let data = Dataset::parse_csv("\n1.0,3,4\n\n0,1,2\n", format()).unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data.samples()[0].label, 1);
    }

    #[test]
    fn rejects_malformed_rows() {
        assert!(matches!(
            Dataset::parse_csv("0,1,2\n1,3\n", format()),
            Err(DatasetError::Width { line: 2, expected: 2, actual: 1 })
        ));
        assert!(matches!(
            Dataset::parse_csv("3,1,2\n", format()),
            Err(DatasetError::Label { line: 1, label: 3, classes: 3 })
        ));
        assert!(matches!(
            Dataset::parse_csv("0,1,x\n", format()),
            Err(DatasetError::Parse { line: 1, .. })
        ));
        assert!(matches!(
            Dataset::parse_csv("1.5,1,2\n", format()),
            Err(DatasetError::Parse { line: 1, .. })
        ));
        assert!(matches!(Dataset::parse_csv("\n\n", format()), Err(DatasetError::Empty)));
    }

    #[test]
    fn rejects_network_of_wrong_shape() {
        let data = Dataset::parse_csv(TRAIN, format()).unwrap();
        let mut network = Network::new(0.1, &[3, 4, 3], &mut ChaCha8Rng::seed_from_u64(0)).unwrap();
        assert!(matches!(
            data.train_epoch(&mut network, &CpuKernel),
            Err(DatasetError::Network(NetworkError::ShapeMismatch { .. }))
        ));
    }

    #[test]
    fn training_reaches_accuracy_on_held_out_rows() {
        let train = Dataset::parse_csv(TRAIN, format()).unwrap();
        let test = Dataset::parse_csv(TEST, format()).unwrap();
        let mut network = Network::new(0.3, &[4, 8, 3], &mut ChaCha8Rng::seed_from_u64(42)).unwrap();
        for _ in 0..300 {
            train.train_epoch(&mut network, &CpuKernel).unwrap();
        }
        let accuracy = test.accuracy(&network, &CpuKernel).unwrap();
        assert!(accuracy >= 5.0 / 6.0, "held-out accuracy {accuracy}");
        assert!(train.correct(&network, &CpuKernel).unwrap() >= 11);
    }
}
