//! Training driver wrapped around a [`Sequential`] chain: label encoding,
//! minibatch slicing, the epoch loop, evaluation and prediction helpers.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::Error;
use crate::graph::{Layer, Sequential};
use crate::layers::LayerKind;
use crate::loss::{gradient, Loss};
use crate::math;
use crate::optimizer::Optimizer;
use crate::tensor::{Label, Tensor, Vector};

/// Handle given to training callbacks; lets them stop the run between
/// batches or epochs.
#[derive(Debug, Default)]
pub struct TrainControl {
    stop: bool,
}

impl TrainControl {
    pub fn request_stop(&mut self) {
        self.stop = true;
    }

    pub fn stop_requested(&self) -> bool {
        self.stop
    }
}

/// Classification outcome over a test set.
#[derive(Debug, Default)]
pub struct TestResult {
    pub num_success: usize,
    pub num_total: usize,
    /// `confusion_matrix[predicted][actual]` counts.
    pub confusion_matrix: BTreeMap<Label, BTreeMap<Label, usize>>,
}

impl TestResult {
    pub fn accuracy(&self) -> f32 {
        if self.num_total == 0 {
            return 0.0;
        }
        self.num_success as f32 * 100.0 / self.num_total as f32
    }
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "accuracy:{}% ({}/{})",
            self.accuracy(),
            self.num_success,
            self.num_total
        )
    }
}

#[derive(Debug, Default)]
pub struct Network {
    name: String,
    net: Sequential,
}

impl Network {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            net: Sequential::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add(&mut self, kernel: impl Into<LayerKind>) -> Result<(), Error> {
        self.net.add(kernel)
    }

    pub fn add_layer(&mut self, layer: Layer) -> Result<(), Error> {
        self.net.add_layer(layer)
    }

    /// Re-roll every trainable parameter.
    pub fn init_weight(&mut self) -> Result<(), Error> {
        self.net.setup(true)
    }

    pub fn layer_size(&self) -> usize {
        self.net.len()
    }

    pub fn in_data_size(&self) -> usize {
        self.net.in_data_size()
    }

    pub fn out_data_size(&self) -> usize {
        self.net.out_data_size()
    }

    pub fn sequential(&self) -> &Sequential {
        &self.net
    }

    pub fn sequential_mut(&mut self) -> &mut Sequential {
        &mut self.net
    }

    pub fn predict(&mut self, input: &[f32]) -> Result<Vector, Error> {
        let expected = self.net.in_data_size();
        if input.len() != expected {
            return Err(Error::DataMismatch {
                layer_type: self.net.layer(0).layer_type(),
                expected,
                received: input.len(),
            });
        }
        let out = self.net.forward(&[input.to_vec()])?;
        Ok(out.into_iter().next().unwrap_or_default())
    }

    pub fn predict_batch(&mut self, inputs: &[Vector]) -> Result<Tensor, Error> {
        self.net.forward(inputs)
    }

    pub fn predict_label(&mut self, input: &[f32]) -> Result<Label, Error> {
        Ok(math::max_index(&self.predict(input)?))
    }

    pub fn predict_max_value(&mut self, input: &[f32]) -> Result<f32, Error> {
        let prediction = self.predict(input)?;
        Ok(prediction.iter().cloned().fold(f32::NEG_INFINITY, f32::max))
    }

    /// Classification training: labels are one-hot encoded against the last
    /// layer's output range and fed to [`Network::fit`].
    pub fn train<L, O>(
        &mut self,
        loss: &L,
        optimizer: &mut O,
        inputs: &[Vector],
        labels: &[Label],
        batch_size: usize,
        epochs: usize,
    ) -> Result<bool, Error>
    where
        L: Loss,
        O: Optimizer,
    {
        self.train_with(
            loss, optimizer, inputs, labels, batch_size, epochs, false,
            |_| {}, |_| {},
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn train_with<L, O, B, E>(
        &mut self,
        loss: &L,
        optimizer: &mut O,
        inputs: &[Vector],
        labels: &[Label],
        batch_size: usize,
        epochs: usize,
        reset_weights: bool,
        on_batch: B,
        on_epoch: E,
    ) -> Result<bool, Error>
    where
        L: Loss,
        O: Optimizer,
        B: FnMut(&mut TrainControl),
        E: FnMut(&mut TrainControl),
    {
        if inputs.len() != labels.len() {
            return Ok(false);
        }
        // wire (and maybe reset) first so the label encoding can see the
        // output range; fit must not reset a second time
        self.net.setup(reset_weights)?;
        let targets = self.net.label2vec(labels);
        self.fit_with(
            loss, optimizer, inputs, &targets, batch_size, epochs, false,
            on_batch, on_epoch,
        )
    }

    /// Regression training on raw target rows.
    pub fn fit<L, O>(
        &mut self,
        loss: &L,
        optimizer: &mut O,
        inputs: &[Vector],
        targets: &[Vector],
        batch_size: usize,
        epochs: usize,
    ) -> Result<bool, Error>
    where
        L: Loss,
        O: Optimizer,
    {
        self.fit_with(
            loss, optimizer, inputs, targets, batch_size, epochs, false,
            |_| {}, |_| {},
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn fit_with<L, O, B, E>(
        &mut self,
        loss: &L,
        optimizer: &mut O,
        inputs: &[Vector],
        targets: &[Vector],
        batch_size: usize,
        epochs: usize,
        reset_weights: bool,
        mut on_batch: B,
        mut on_epoch: E,
    ) -> Result<bool, Error>
    where
        L: Loss,
        O: Optimizer,
        B: FnMut(&mut TrainControl),
        E: FnMut(&mut TrainControl),
    {
        if inputs.len() != targets.len() || batch_size == 0 || inputs.len() < batch_size {
            return Ok(false);
        }

        self.net.setup(reset_weights)?;
        optimizer.reset();
        let mut control = TrainControl::default();

        for _ in 0..epochs {
            if control.stop_requested() {
                break;
            }
            let mut i = 0;
            while i < inputs.len() && !control.stop_requested() {
                let end = (i + batch_size).min(inputs.len());
                self.train_once(loss, optimizer, &inputs[i..end], &targets[i..end])?;
                on_batch(&mut control);
                i = end;
            }
            on_epoch(&mut control);
        }
        Ok(true)
    }

    fn train_once<L, O>(
        &mut self,
        loss: &L,
        optimizer: &mut O,
        inputs: &[Vector],
        targets: &[Vector],
    ) -> Result<(), Error>
    where
        L: Loss,
        O: Optimizer,
    {
        let out = self.net.forward(inputs)?;
        let grads = gradient(loss, &out, targets);
        self.net.backward(&grads)?;
        self.net.update_weights(optimizer);
        Ok(())
    }

    /// Average loss over a dataset, without touching gradients.
    pub fn loss_value<L: Loss>(
        &mut self,
        loss: &L,
        inputs: &[Vector],
        targets: &[Vector],
    ) -> Result<f32, Error> {
        if inputs.is_empty() {
            return Ok(0.0);
        }
        let out = self.net.forward(inputs)?;
        let total: f32 = out
            .iter()
            .zip(targets)
            .map(|(y, t)| loss.f(y, t))
            .sum();
        Ok(total / inputs.len() as f32)
    }

    /// Run the classifier over a labelled set and tally the confusion matrix.
    pub fn test(&mut self, inputs: &[Vector], labels: &[Label]) -> Result<TestResult, Error> {
        let mut result = TestResult::default();
        for (input, &actual) in inputs.iter().zip(labels) {
            let predicted = self.predict_label(input)?;
            if predicted == actual {
                result.num_success += 1;
            }
            result.num_total += 1;
            *result
                .confusion_matrix
                .entry(predicted)
                .or_default()
                .entry(actual)
                .or_default() += 1;
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{FullyConnected, Sigmoid};
    use crate::loss::Mse;
    use crate::optimizer::GradientDescent;

    #[test]
    fn mismatched_lengths_refuse_to_train() {
        let mut net = Network::new("t");
        net.add(FullyConnected::new(2, 2)).unwrap();
        let trained = net
            .train(
                &Mse,
                &mut GradientDescent::new(0.1),
                &[vec![0.0, 0.0]],
                &[0, 1],
                1,
                1,
            )
            .unwrap();
        assert!(!trained);
    }

    #[test]
    fn predict_checks_input_length() {
        let mut net = Network::new("t");
        net.add(FullyConnected::new(3, 1)).unwrap();
        assert!(matches!(
            net.predict(&[1.0]),
            Err(Error::DataMismatch { expected: 3, .. })
        ));
    }

    #[test]
    fn stop_request_halts_after_one_batch() {
        let mut net = Network::new("t");
        net.add(FullyConnected::new(2, 2)).unwrap();
        net.add(Sigmoid::new()).unwrap();

        let inputs: Vec<Vector> = (0..8).map(|_| vec![0.5, -0.5]).collect();
        let labels = vec![0; 8];
        let mut batches = 0;
        net.train_with(
            &Mse,
            &mut GradientDescent::new(0.1),
            &inputs,
            &labels,
            1,
            10,
            false,
            |control| {
                batches += 1;
                control.request_stop();
            },
            |_| {},
        )
        .unwrap();
        assert_eq!(batches, 1);
    }

    #[test]
    fn empty_sets_yield_zero_not_nan() {
        assert_eq!(TestResult::default().accuracy(), 0.0);

        let mut net = Network::new("t");
        net.add(FullyConnected::new(2, 1)).unwrap();
        let loss = net.loss_value(&Mse, &[], &[]).unwrap();
        assert_eq!(loss, 0.0);
    }

    #[test]
    fn test_tallies_the_confusion_matrix() {
        let mut net = Network::new("t");
        net.add(FullyConnected::new(2, 2)).unwrap();
        net.init_weight().unwrap();

        let inputs = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let labels = vec![0, 1];
        let result = net.test(&inputs, &labels).unwrap();
        assert_eq!(result.num_total, 2);
        let tallied: usize = result
            .confusion_matrix
            .values()
            .flat_map(|row| row.values())
            .sum();
        assert_eq!(tallied, 2);
    }
}
