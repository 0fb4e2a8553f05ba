//! Sequential container.
//!
//! [`Sequential`] owns an ordered list of layers, constructs them against an
//! input shape in [`Sequential::compile`], and chains their forward and
//! backward passes. Optimizer application lives in [`crate::optim`].

use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};
use crate::layers::{Layer, LayerKind};
use crate::modelio;
use crate::tensors::Tensor;

/// A stack of layers applied in order.
///
/// ```
/// use briny_nn::Tensor;
/// use briny_nn::activations::Activation;
/// use briny_nn::layers::{Dense, Flatten, Layer};
/// use briny_nn::model::Sequential;
///
/// let mut model = Sequential::new()
///     .with(Flatten::new())
///     .with(Dense::new(3).activation(Activation::Tanh).seed(1))
///     .with(Dense::new(1).seed(2));
/// model.compile(&[2, 2]).unwrap();
///
/// assert_eq!(model.output_shape().unwrap(), &[1]);
/// assert_eq!(model.num_parameters().unwrap(), 4 * 3 + 3 + 3 + 1);
/// assert_eq!(model.layers()[1].name(), "dense_0");
///
/// let y = model.forward(&Tensor::zeros(&[2, 2]).unwrap()).unwrap();
/// assert_eq!(y.shape(), &[1]);
/// ```
#[derive(Debug, Default)]
pub struct Sequential {
    layers: Vec<LayerKind>,
    compiled: bool,
}

impl Sequential {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a layer; the model must be compiled again afterwards.
    pub fn add(&mut self, layer: impl Into<LayerKind>) {
        self.layers.push(layer.into());
        self.compiled = false;
    }

    #[must_use]
    pub fn with(mut self, layer: impl Into<LayerKind>) -> Self {
        self.add(layer);
        self
    }

    pub fn layers(&self) -> &[LayerKind] {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut [LayerKind] {
        &mut self.layers
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled
    }

    /// Assigns ids (`dense_0`, `dense_1`, ...) and constructs every layer,
    /// feeding each one the previous layer's output shape.
    ///
    /// # Errors
    /// [`Error::InvalidParameter`] for an empty model, otherwise the first
    /// construction error.
    pub fn compile(&mut self, input_shape: &[usize]) -> Result<()> {
        if self.layers.is_empty() {
            return Err(Error::InvalidParameter("cannot compile an empty model".into()));
        }
        self.compiled = false;

        let mut counters: HashMap<&'static str, usize> = HashMap::new();
        let mut shape = input_shape.to_vec();
        for layer in &mut self.layers {
            let counter = counters.entry(layer.kind_name()).or_default();
            layer.set_id(*counter);
            *counter += 1;

            layer.construct(&shape)?;
            shape = layer.output_shape()?.to_vec();
        }
        self.compiled = true;
        tracing::debug!(layers = self.layers.len(), ?input_shape, output_shape = ?shape, "compiled model");
        Ok(())
    }

    fn ensure_compiled(&self) -> Result<()> {
        if self.compiled {
            Ok(())
        } else {
            Err(Error::NotConstructed { layer: "sequential".into() })
        }
    }

    pub fn input_shape(&self) -> Result<&[usize]> {
        self.ensure_compiled()?;
        self.layers.first().map_or(Err(Error::NotConstructed { layer: "sequential".into() }), Layer::input_shape)
    }

    pub fn output_shape(&self) -> Result<&[usize]> {
        self.ensure_compiled()?;
        self.layers.last().map_or(Err(Error::NotConstructed { layer: "sequential".into() }), Layer::output_shape)
    }

    /// Runs every layer in order and returns the last output.
    pub fn forward(&mut self, input: &Tensor) -> Result<&Tensor> {
        self.ensure_compiled()?;
        let mut layers = self.layers.iter_mut();
        let first = layers.next().ok_or_else(|| Error::NotConstructed { layer: "sequential".into() })?;
        let mut current = first.forward(input)?;
        for layer in layers {
            current = layer.forward(current)?;
        }
        Ok(current)
    }

    /// Runs every layer's backward pass in reverse and returns the gradient
    /// w.r.t. the model input. Parameter gradients accumulate.
    pub fn backward(&mut self, grad: &Tensor) -> Result<&Tensor> {
        self.ensure_compiled()?;
        let mut layers = self.layers.iter_mut().rev();
        let last = layers.next().ok_or_else(|| Error::NotConstructed { layer: "sequential".into() })?;
        let mut current = last.backward(grad)?;
        for layer in layers {
            current = layer.backward(current)?;
        }
        Ok(current)
    }

    pub fn zero_gradients(&mut self) -> Result<()> {
        self.ensure_compiled()?;
        self.layers.iter_mut().try_for_each(Layer::zero_gradients)
    }

    pub fn set_training(&mut self, training: bool) {
        for layer in &mut self.layers {
            layer.set_training(training);
        }
    }

    pub fn num_parameters(&self) -> Result<usize> {
        self.ensure_compiled()?;
        self.layers.iter().map(Layer::num_parameters).sum()
    }

    /// Every kernel and bias in layer order.
    pub fn parameters(&self) -> Result<Vec<&Tensor>> {
        self.ensure_compiled()?;
        let mut params = Vec::new();
        for layer in &self.layers {
            params.extend(layer.parameters()?);
        }
        Ok(params)
    }

    /// Writes every kernel and bias, in layer order, to a `.bpat` file.
    pub fn save_parameters(&self, path: impl AsRef<Path>) -> Result<()> {
        modelio::save_tensors(path, self.parameters()?)
    }

    /// Reads parameters written by [`Sequential::save_parameters`].
    ///
    /// Nothing is modified unless every tensor matches.
    ///
    /// # Errors
    /// - [`Error::CorruptModel`] if the file holds a different number of tensors.
    /// - [`Error::ShapeMismatch`] if any tensor shape differs from its parameter.
    pub fn load_parameters(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let loaded = modelio::load_tensors(path)?;
        let expected = self.parameters()?;
        if loaded.len() != expected.len() {
            return Err(Error::CorruptModel(format!(
                "expected {} parameter tensors, found {}",
                expected.len(),
                loaded.len()
            )));
        }
        for (param, value) in expected.iter().zip(&loaded) {
            if !param.same_shape(value) {
                return Err(Error::mismatch("load_parameters", param.shape(), value.shape()));
            }
        }

        let mut values = loaded.iter();
        for layer in &mut self.layers {
            for (param, _) in layer.parameters_and_grads()? {
                if let Some(value) = values.next() {
                    param.copy_from(value)?;
                }
            }
        }
        Ok(())
    }

    /// One line per layer with its output shape and parameter count.
    pub fn summary(&self) -> Result<String> {
        self.ensure_compiled()?;
        let mut out = String::new();
        for layer in &self.layers {
            out.push_str(&format!(
                "{:<16} {:<18} {}\n",
                layer.name(),
                format!("{:?}", layer.output_shape()?),
                layer.num_parameters()?
            ));
        }
        out.push_str(&format!("total parameters: {}\n", self.num_parameters()?));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init::Initializer;
    use crate::layers::{Dense, Input, Pool2D};
    use crate::tensor;

    #[test]
    fn compile_chains_shapes_and_ids() {
        let mut m = Sequential::new()
            .with(Input::new(&[1, 4, 4]))
            .with(Pool2D::max([2, 2]))
            .with(crate::layers::Flatten::new())
            .with(Dense::new(2))
            .with(Dense::new(1));
        m.compile(&[1, 4, 4]).unwrap();
        let names: Vec<String> = m.layers().iter().map(Layer::name).collect();
        assert_eq!(names, ["input_0", "max_pool2d_0", "flatten_0", "dense_0", "dense_1"]);
        assert_eq!(m.output_shape().unwrap(), &[1]);
        assert!(m.summary().unwrap().contains("total parameters: 13"));
    }

    #[test]
    fn use_before_compile_fails() {
        let mut m = Sequential::new().with(Dense::new(1));
        assert!(matches!(m.forward(&tensor!([1.0])), Err(Error::NotConstructed { .. })));
        assert!(matches!(Sequential::new().compile(&[1]), Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn backward_reaches_the_input() {
        let mut m = Sequential::new()
            .with(Dense::new(2).kernel_init(Initializer::Constant(1.0)))
            .with(Dense::new(1).kernel_init(Initializer::Constant(2.0)));
        m.compile(&[3]).unwrap();
        assert_eq!(m.forward(&tensor!([1.0, 1.0, 1.0])).unwrap().to_vec(), vec![12.0]);
        assert_eq!(m.backward(&tensor!([1.0])).unwrap().to_vec(), vec![4.0, 4.0, 4.0]);
    }
}
