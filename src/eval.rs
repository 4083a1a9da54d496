use std::fmt;

use crate::{dataset::Array, Error, Result};

/// How predictions are turned into decisions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    /// Threshold the first output at 0.5.
    Binary,
    /// Argmax over the outputs, labels hold the class index.
    Class,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EvalReport {
    pub samples: usize,
    pub outputs: usize,
    pub accuracy: f64,
    /// Only available when every output has a label.
    pub mean_abs_error: Option<f64>,
    /// Network outputs, `samples * outputs` values.
    pub predictions: Vec<f32>,
    mode: Mode,
}

impl EvalReport {
    pub fn new(predictions: Vec<f32>, outputs: usize, labels: &Array) -> Result<Self> {
        let samples = labels.len();

        if outputs == 0 || predictions.len() != samples * outputs {
            return Err(Error::Shape(format!(
                "{} predictions do not split into {samples} samples of {outputs} outputs",
                predictions.len()
            )));
        }

        let label_width = labels.row_len();
        let mode = match (label_width, outputs) {
            (1, n) if n > 1 => Mode::Class,
            (l, n) if l == n => Mode::Binary,
            (l, n) => return Err(Error::Shape(format!("{l} labels per sample for {n} network outputs"))),
        };

        let mut report = Self { samples, outputs, accuracy: 0.0, mean_abs_error: None, predictions, mode };

        if samples > 0 {
            let correct = (0..samples).filter(|&i| report.decision(i) == decide(mode, labels.row(i))).count();
            report.accuracy = correct as f64 / samples as f64;

            if mode == Mode::Binary {
                let total: f64 = report
                    .predictions
                    .iter()
                    .zip(labels.data())
                    .map(|(&p, &l)| f64::from((p - l).abs()))
                    .sum();
                report.mean_abs_error = Some(total / report.predictions.len() as f64);
            }
        }

        Ok(report)
    }

    pub fn prediction(&self, idx: usize) -> &[f32] {
        &self.predictions[idx * self.outputs..(idx + 1) * self.outputs]
    }

    /// Class chosen for sample `idx`.
    pub fn decision(&self, idx: usize) -> usize {
        match self.mode {
            Mode::Binary => usize::from(self.prediction(idx)[0] > 0.5),
            Mode::Class => argmax(self.prediction(idx)),
        }
    }
}

fn decide(mode: Mode, label: &[f32]) -> usize {
    match mode {
        Mode::Binary => usize::from(label[0] > 0.5),
        Mode::Class => label[0].round().max(0.0) as usize,
    }
}

fn argmax(xs: &[f32]) -> usize {
    let mut best = 0;
    for (i, &x) in xs.iter().enumerate() {
        if x > xs[best] {
            best = i;
        }
    }
    best
}

impl fmt::Display for EvalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Samples: {}, Accuracy: {:.2}%", self.samples, self.accuracy * 100.0)?;

        if let Some(mae) = self.mean_abs_error {
            write!(f, ", Mean Abs Error: {mae:.6}")?;
        }

        Ok(())
    }
}

/// Difference between the quantised run and the floating point reference.
#[derive(Clone, Debug, PartialEq)]
pub struct Comparison {
    pub samples: usize,
    pub accuracy_delta: f64,
    pub max_abs_deviation: f32,
    pub mean_abs_deviation: f64,
    /// Samples whose decision differs between the two runs.
    pub changed_decisions: usize,
}

impl Comparison {
    pub fn new(quantised: &EvalReport, reference: &EvalReport) -> Result<Self> {
        if quantised.predictions.len() != reference.predictions.len() || quantised.outputs != reference.outputs {
            return Err(Error::Shape("the two runs produced differently shaped predictions".to_string()));
        }

        let mut max_abs_deviation = 0f32;
        let mut total = 0f64;
        for (&q, &r) in quantised.predictions.iter().zip(&reference.predictions) {
            let deviation = (q - r).abs();
            max_abs_deviation = max_abs_deviation.max(deviation);
            total += f64::from(deviation);
        }

        let mean_abs_deviation =
            if quantised.predictions.is_empty() { 0.0 } else { total / quantised.predictions.len() as f64 };

        let changed_decisions =
            (0..quantised.samples).filter(|&i| quantised.decision(i) != reference.decision(i)).count();

        Ok(Self {
            samples: quantised.samples,
            accuracy_delta: quantised.accuracy - reference.accuracy,
            max_abs_deviation,
            mean_abs_deviation,
            changed_decisions,
        })
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Quantised vs Reference over {} samples", self.samples)?;
        writeln!(f, "Accuracy Delta: {:+.2}%", self.accuracy_delta * 100.0)?;
        writeln!(f, "Max Abs Deviation: {:.6}", self.max_abs_deviation)?;
        writeln!(f, "Mean Abs Deviation: {:.6}", self.mean_abs_deviation)?;
        write!(f, "Changed Decisions: {}", self.changed_decisions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(shape: Vec<usize>, data: Vec<f32>) -> Array {
        Array::new(shape, data).unwrap()
    }

    #[test]
    fn binary_accuracy_and_error() {
        let y = labels(vec![4], vec![1.0, 0.0, 1.0, 0.0]);
        let report = EvalReport::new(vec![0.9, 0.2, 0.4, 0.6], 1, &y).unwrap();

        assert_eq!(report.accuracy, 0.5);
        let mae = report.mean_abs_error.unwrap();
        assert!((mae - 0.375).abs() < 1e-6);
    }

    #[test]
    fn class_accuracy() {
        let y = labels(vec![3], vec![0.0, 2.0, 1.0]);
        let predictions = vec![0.7, 0.2, 0.1, 0.1, 0.1, 0.8, 0.5, 0.1, 0.4];
        let report = EvalReport::new(predictions, 3, &y).unwrap();

        assert!((report.accuracy - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(report.mean_abs_error, None);
        assert_eq!(report.decision(2), 0);
    }

    #[test]
    fn multi_output_labels() {
        let y = labels(vec![2, 2], vec![1.0, 0.5, 0.0, 0.25]);
        let report = EvalReport::new(vec![0.8, 0.5, 0.3, 0.25], 2, &y).unwrap();

        assert_eq!(report.accuracy, 1.0);
        assert!((report.mean_abs_error.unwrap() - 0.125).abs() < 1e-6);
    }

    #[test]
    fn rejects_mismatched_shapes() {
        let y = labels(vec![2, 3], vec![0.0; 6]);
        assert!(EvalReport::new(vec![0.0; 4], 2, &y).is_err());
        assert!(EvalReport::new(vec![0.0; 5], 3, &y).is_err());
    }

    #[test]
    fn empty_dataset() {
        let y = labels(vec![0], vec![]);
        let report = EvalReport::new(vec![], 1, &y).unwrap();
        assert_eq!(report.samples, 0);
        assert_eq!(report.accuracy, 0.0);
    }

    #[test]
    fn comparison_counts_flipped_decisions() {
        let y = labels(vec![3], vec![1.0, 0.0, 1.0]);
        let reference = EvalReport::new(vec![0.9, 0.1, 0.55], 1, &y).unwrap();
        let quantised = EvalReport::new(vec![0.875, 0.1, 0.45], 1, &y).unwrap();

        let comparison = Comparison::new(&quantised, &reference).unwrap();
        assert_eq!(comparison.changed_decisions, 1);
        assert!((comparison.max_abs_deviation - 0.1).abs() < 1e-6);
        assert!((comparison.accuracy_delta + 1.0 / 3.0).abs() < 1e-9);

        let other = EvalReport::new(vec![0.9, 0.1], 1, &labels(vec![2], vec![1.0, 0.0])).unwrap();
        assert!(Comparison::new(&other, &reference).is_err());
    }
}
