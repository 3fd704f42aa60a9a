//! # Training and Inference Graphs
//!
//! The classification graph around [`ResNet50`]:
//!
//! * inputs: a [`ClassificationBatch`] of images and labels, plus a learning rate;
//! * forward: logits and softmax prediction;
//! * loss: mean sparse softmax cross entropy;
//! * train: one [`Optimizer`] (Adam) step;
//! * evaluate: top-1 accuracy (`in_top_k` with ``k = 1``).
//!
//! Batch norm runs on batch statistics under an autodiff backend ([`TrainingGraph`]),
//! and on its moving statistics otherwise ([`InferenceGraph`]).

use crate::models::resnet50::model::ResNet50;
use bimm_contracts::assert_shape_contract;
use burn::module::AutodiffModule;
use burn::nn::loss::CrossEntropyLossConfig;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::{Backend, Int, Tensor};
use burn::tensor::ElementConversion;
use burn::tensor::activation::softmax;
use burn::tensor::backend::AutodiffBackend;
use serde::Serialize;

/// Image / label batch; the graph's input placeholders.
#[derive(Debug, Clone)]
pub struct ClassificationBatch<B: Backend> {
    /// ``[batch, channels, height, width]`` images.
    pub images: Tensor<B, 4>,

    /// ``[batch]`` class indices.
    pub labels: Tensor<B, 1, Int>,
}

impl<B: Backend> ClassificationBatch<B> {
    /// Create a batch.
    ///
    /// # Panics
    ///
    /// If the image and label batch sizes differ.
    pub fn new(
        images: Tensor<B, 4>,
        labels: Tensor<B, 1, Int>,
    ) -> Self {
        let [batch] = labels.dims();
        assert_shape_contract!(
            ["batch", "channels", "height", "width"],
            &images,
            &[("batch", batch)]
        );
        Self { images, labels }
    }

    /// The batch size.
    pub fn len(&self) -> usize {
        self.labels.dims()[0]
    }

    /// Check if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Output of the classification graph.
#[derive(Debug, Clone)]
pub struct ClassificationOutput<B: Backend> {
    /// ``[batch, num_classes]`` logits.
    pub logits: Tensor<B, 2>,

    /// ``[batch, num_classes]`` softmax probabilities.
    pub prediction: Tensor<B, 2>,

    /// Scalar mean cross entropy, as a ``[1]`` tensor.
    pub loss: Tensor<B, 1>,

    /// ``[batch]`` target class indices.
    pub labels: Tensor<B, 1, Int>,
}

impl<B: Backend> ClassificationOutput<B> {
    /// The loss as a scalar.
    pub fn loss_value(&self) -> f32 {
        self.loss.clone().into_scalar().elem::<f32>()
    }

    /// Top-1 accuracy over the batch.
    pub fn accuracy(&self) -> f32 {
        top_k_accuracy(self.logits.clone(), self.labels.clone(), 1)
    }

    /// Scalar metrics of this output.
    pub fn metrics(&self) -> StepMetrics {
        StepMetrics {
            loss: self.loss_value(),
            accuracy: self.accuracy(),
        }
    }
}

/// Scalar metrics of one graph evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StepMetrics {
    /// Mean cross entropy.
    pub loss: f32,

    /// Top-1 accuracy in ``[0, 1]``.
    pub accuracy: f32,
}

/// Fraction of rows whose target class is among the `k` largest logits.
///
/// Ties with the target logit count in the target's favor, as `in_top_k` does.
/// Rows with a label outside ``[0, num_classes)`` never count.
///
/// # Arguments
///
/// - `logits`: ``[batch, num_classes]``.
/// - `labels`: ``[batch]`` class indices.
/// - `k`: must be > 0.
pub fn top_k_accuracy<B: Backend>(
    logits: Tensor<B, 2>,
    labels: Tensor<B, 1, Int>,
    k: usize,
) -> f32 {
    assert!(k > 0, "k must be > 0");
    let [batch, num_classes] = logits.dims();

    let in_range = labels.clone().greater_equal_elem(0).int()
        * labels.clone().lower_elem(num_classes as i64).int();
    let labels = labels.mask_fill(in_range.clone().equal_elem(0), 0);

    let target = logits.clone().gather(1, labels.reshape([batch, 1]));
    let above = logits
        .greater(target.repeat_dim(1, num_classes))
        .int()
        .sum_dim(1)
        .reshape([batch]);

    (above.lower_elem(k as i64).int() * in_range)
        .float()
        .mean()
        .into_scalar()
        .elem::<f32>()
}

impl<B: Backend> ResNet50<B> {
    /// Build the classification graph for a batch.
    ///
    /// # Arguments
    ///
    /// - `images`: ``[batch, channels, height, width]``.
    /// - `labels`: ``[batch]`` class indices.
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        labels: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let logits = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&logits.device())
            .forward(logits.clone(), labels.clone());
        let prediction = softmax(logits.clone(), 1);

        ClassificationOutput {
            logits,
            prediction,
            loss,
            labels,
        }
    }
}

/// Training graph: model, optimizer, and the train op.
pub struct TrainingGraph<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<ResNet50<B>, B>,
{
    model: ResNet50<B>,
    optimizer: O,
    steps: usize,
}

/// Build a [`TrainingGraph`] with an Adam optimizer.
pub fn adam_training_graph<B: AutodiffBackend>(
    model: ResNet50<B>,
    adam: &AdamConfig,
) -> TrainingGraph<B, impl Optimizer<ResNet50<B>, B> + use<B>> {
    TrainingGraph::new(model, adam.init())
}

impl<B, O> TrainingGraph<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<ResNet50<B>, B>,
{
    /// Create a graph from a model and optimizer.
    pub fn new(
        model: ResNet50<B>,
        optimizer: O,
    ) -> Self {
        Self {
            model,
            optimizer,
            steps: 0,
        }
    }

    /// The current model.
    pub fn model(&self) -> &ResNet50<B> {
        &self.model
    }

    /// The number of optimizer steps taken.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Run one training step: forward, backward, and an optimizer update.
    ///
    /// # Returns
    ///
    /// The loss and accuracy of the batch, measured before the update.
    #[tracing::instrument(level = "debug", skip_all, fields(step = self.steps, learning_rate = learning_rate))]
    pub fn step(
        &mut self,
        batch: ClassificationBatch<B>,
        learning_rate: f64,
    ) -> StepMetrics {
        let output = self
            .model
            .forward_classification(batch.images, batch.labels);
        let metrics = output.metrics();

        let grads = output.loss.backward();
        let grads = GradientsParams::from_grads(grads, &self.model);
        self.model = self
            .optimizer
            .step(learning_rate, self.model.clone(), grads);
        self.steps += 1;

        tracing::debug!(loss = metrics.loss, accuracy = metrics.accuracy, "train step");
        metrics
    }

    /// Evaluate a batch without updating the model.
    ///
    /// Batch norm still uses batch statistics here; see [`InferenceGraph`].
    pub fn evaluate(
        &self,
        batch: ClassificationBatch<B>,
    ) -> StepMetrics {
        self.model
            .forward_classification(batch.images, batch.labels)
            .metrics()
    }

    /// Release the trained model.
    pub fn into_model(self) -> ResNet50<B> {
        self.model
    }

    /// Freeze into an [`InferenceGraph`] on the inner backend.
    pub fn into_inference(self) -> InferenceGraph<B::InnerBackend> {
        InferenceGraph::new(self.model.valid())
    }
}

/// Inference graph: batch norm uses its moving statistics.
#[derive(Debug, Clone)]
pub struct InferenceGraph<B: Backend> {
    model: ResNet50<B>,
}

impl<B: Backend> InferenceGraph<B> {
    /// Create a graph from a model.
    pub fn new(model: ResNet50<B>) -> Self {
        Self { model }
    }

    /// The model.
    pub fn model(&self) -> &ResNet50<B> {
        &self.model
    }

    /// Class probabilities for a batch of images.
    pub fn predict(
        &self,
        images: Tensor<B, 4>,
    ) -> Tensor<B, 2> {
        self.model.predict(images)
    }

    /// Predicted class indices for a batch of images.
    pub fn classify(
        &self,
        images: Tensor<B, 4>,
    ) -> Tensor<B, 1, Int> {
        let logits = self.model.forward(images);
        let [batch, _] = logits.dims();
        logits.argmax(1).reshape([batch])
    }

    /// Loss and accuracy of a labelled batch.
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn evaluate(
        &self,
        batch: ClassificationBatch<B>,
    ) -> StepMetrics {
        self.model
            .forward_classification(batch.images, batch.labels)
            .metrics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::resnet50::model::ResNet50Config;
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::Distribution;
    use hamcrest::prelude::*;

    fn narrow_config() -> ResNet50Config {
        ResNet50Config::new(3)
            .with_image_resolution([40, 40])
            .with_stem_filters(4)
            .with_stage_filters([[2, 2, 4], [2, 2, 4], [2, 2, 8], [2, 2, 8]])
            .with_identity_blocks([1, 1, 1, 1])
    }

    #[test]
    fn test_top_k_accuracy() {
        type B = NdArray<f32>;
        let device = Default::default();

        let logits: Tensor<B, 2> =
            Tensor::from_floats([[0.1, 0.9, 0.0], [0.8, 0.1, 0.1], [0.2, 0.3, 0.5]], &device);
        let labels: Tensor<B, 1, Int> = Tensor::from_ints([1, 1, 2], &device);

        assert_that!(
            top_k_accuracy(logits.clone(), labels.clone(), 1),
            close_to(2.0 / 3.0, 1e-6)
        );
        assert_that!(
            top_k_accuracy(logits.clone(), labels.clone(), 2),
            close_to(1.0, 1e-6)
        );
        assert_that!(top_k_accuracy(logits, labels, 3), close_to(1.0, 1e-6));
    }

    #[test]
    fn test_top_k_accuracy_out_of_range_labels() {
        type B = NdArray<f32>;
        let device = Default::default();

        let logits: Tensor<B, 2> =
            Tensor::from_floats([[0.1, 0.9, 0.0], [0.8, 0.1, 0.1], [0.2, 0.3, 0.5]], &device);
        let labels: Tensor<B, 1, Int> = Tensor::from_ints([1, 5, -1], &device);

        assert_that!(
            top_k_accuracy(logits.clone(), labels.clone(), 1),
            close_to(1.0 / 3.0, 1e-6)
        );
        assert_that!(top_k_accuracy(logits, labels, 3), close_to(1.0 / 3.0, 1e-6));
    }

    #[test]
    #[should_panic(expected = "!~ batch")]
    fn test_batch_mismatch() {
        type B = NdArray<f32>;
        let device = Default::default();

        let images: Tensor<B, 4> = Tensor::zeros([2, 3, 8, 8], &device);
        let labels: Tensor<B, 1, Int> = Tensor::from_ints([0, 1, 2], &device);
        ClassificationBatch::new(images, labels);
    }

    #[test]
    fn test_forward_classification() {
        type B = NdArray<f32>;
        let device = Default::default();

        let model: ResNet50<B> = narrow_config().init(&device);
        let images: Tensor<B, 4> = Tensor::random([4, 3, 40, 40], Distribution::Default, &device);
        let labels: Tensor<B, 1, Int> = Tensor::from_ints([0, 1, 2, 0], &device);
        let batch = ClassificationBatch::new(images, labels);
        assert_eq!(batch.len(), 4);

        let output = model.forward_classification(batch.images, batch.labels);
        assert_eq!(output.logits.dims(), [4, 3]);
        assert_eq!(output.prediction.dims(), [4, 3]);
        assert_eq!(output.loss.dims(), [1]);

        let metrics = output.metrics();
        assert!(metrics.loss.is_finite());
        assert!(metrics.loss > 0.0);
        assert_that!(metrics.accuracy, is(greater_than_or_equal_to(0.0)));
        assert_that!(metrics.accuracy, is(less_than_or_equal_to(1.0)));
    }

    #[test]
    fn test_training_step_updates_model() {
        type B = Autodiff<NdArray<f32>>;
        let device = Default::default();

        let model: ResNet50<B> = narrow_config().init(&device);
        let before = model.fc.weight.val().into_data();

        let mut graph = adam_training_graph(model, &AdamConfig::new());
        assert_eq!(graph.steps(), 0);

        let images: Tensor<B, 4> = Tensor::random([4, 3, 40, 40], Distribution::Default, &device);
        let labels: Tensor<B, 1, Int> = Tensor::from_ints([0, 1, 2, 0], &device);
        let batch = ClassificationBatch::new(images, labels);

        let metrics = graph.step(batch.clone(), 1e-2);
        assert!(metrics.loss.is_finite());
        assert_eq!(graph.steps(), 1);

        let after = graph.model().fc.weight.val().into_data();
        assert_ne!(before, after);

        let metrics = graph.evaluate(batch);
        assert!(metrics.loss.is_finite());

        let inference = graph.into_inference();
        let images = Tensor::random([2, 3, 40, 40], Distribution::Default, &device);
        let probs = inference.predict(images.clone());
        assert_eq!(probs.dims(), [2, 3]);

        let classes = inference.classify(images);
        assert_eq!(classes.dims(), [2]);
        let classes = classes.into_data().to_vec::<i64>().unwrap();
        assert!(classes.iter().all(|c| (0..3).contains(c)));
    }
}
