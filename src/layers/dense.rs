//! Fully connected layer.

use super::{HasBias, HasKernel, Layer, LayerBase, batch_of, not_constructed, unsupported, validate_input_shape, with_batch};
use crate::activations::{Activated, Activation};
use crate::backprop::{dense_backward, dense_forward};
use crate::error::{Error, Result};
use crate::init::Initializer;
use crate::tensors::Tensor;

/// `y = f(x · W + b)` over a `(in)` sample or an `(N, in)` batch.
///
/// The kernel has shape `(in, units)` and the bias `(units)`.
///
/// ```
/// use briny_nn::Tensor;
/// use briny_nn::activations::Activation;
/// use briny_nn::init::Initializer;
/// use briny_nn::layers::{Dense, Layer};
///
/// let mut dense = Dense::new(2)
///     .activation(Activation::Relu)
///     .kernel_init(Initializer::Constant(1.0));
/// dense.construct(&[3]).unwrap();
/// let y = dense.forward(&Tensor::from_vec(&[3], vec![1.0, 2.0, -4.0]).unwrap()).unwrap();
/// assert_eq!(y.to_vec(), vec![0.0, 0.0]);
/// ```
#[derive(Debug)]
pub struct Dense {
    base: LayerBase,
    units: usize,
    activation: Activation,
    use_bias: bool,
    kernel_init: Initializer,
    bias_init: Initializer,
    state: Option<DenseState>,
}

#[derive(Debug)]
struct DenseState {
    input_shape: Vec<usize>,
    output_shape: Vec<usize>,
    batch: Option<usize>,
    kernel: Tensor,
    grad_kernel: Tensor,
    bias: Option<Tensor>,
    grad_bias: Option<Tensor>,
    input: Tensor,
    pre_activation: Tensor,
    output: Tensor,
    grad_output: Tensor,
    grad_input: Tensor,
}

impl DenseState {
    fn adjust_for_batch(&mut self, layer: &str, batch: Option<usize>) -> Result<()> {
        if batch == self.batch {
            return Ok(());
        }
        tracing::trace!(layer, from = ?self.batch, to = ?batch, "relayout for batch");
        let in_shape = with_batch(batch, &self.input_shape);
        let out_shape = with_batch(batch, &self.output_shape);
        self.input = Tensor::zeros(&in_shape)?.with_name("input");
        self.grad_input = Tensor::zeros(&in_shape)?.with_name("grad_input");
        self.pre_activation = Tensor::zeros(&out_shape)?.with_name("pre_activation");
        self.output = Tensor::zeros(&out_shape)?.with_name("output");
        self.grad_output = Tensor::zeros(&out_shape)?.with_name("grad_output");
        self.batch = batch;
        Ok(())
    }
}

impl Activated for DenseState {
    fn activation_buffers(&mut self) -> (&Tensor, &Tensor, &mut Tensor) {
        (&self.pre_activation, &self.output, &mut self.grad_output)
    }
}

impl Dense {
    /// A layer with `units` outputs, linear activation and a bias.
    pub fn new(units: usize) -> Self {
        Self {
            base: LayerBase::trainable(),
            units,
            activation: Activation::Linear,
            use_bias: true,
            kernel_init: Initializer::GlorotUniform,
            bias_init: Initializer::Zeros,
            state: None,
        }
    }

    #[must_use]
    pub fn activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    #[must_use]
    pub fn bias(mut self, use_bias: bool) -> Self {
        self.use_bias = use_bias;
        self
    }

    #[must_use]
    pub fn kernel_init(mut self, init: Initializer) -> Self {
        self.kernel_init = init;
        self
    }

    #[must_use]
    pub fn bias_init(mut self, init: Initializer) -> Self {
        self.bias_init = init;
        self
    }

    /// Seeds the parameter initializers.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.base.seed = Some(seed);
        self
    }

    pub fn units(&self) -> usize {
        self.units
    }

    pub fn get_activation(&self) -> Activation {
        self.activation
    }

    fn state(&self) -> Result<&DenseState> {
        self.state.as_ref().ok_or_else(|| not_constructed(self.name()))
    }

    fn state_mut(&mut self) -> Result<&mut DenseState> {
        let name = self.name();
        self.state.as_mut().ok_or_else(|| not_constructed(name))
    }

    pub(crate) fn parameters_and_grads(&mut self) -> Result<Vec<(&mut Tensor, &Tensor)>> {
        let state = self.state_mut()?;
        let mut params = vec![(&mut state.kernel, &state.grad_kernel)];
        if let (Some(b), Some(gb)) = (state.bias.as_mut(), state.grad_bias.as_ref()) {
            params.push((b, gb));
        }
        Ok(params)
    }
}

impl Layer for Dense {
    fn kind_name(&self) -> &'static str {
        "dense"
    }

    fn id(&self) -> usize {
        self.base.id
    }

    fn set_id(&mut self, id: usize) {
        self.base.id = id;
    }

    fn construct(&mut self, input_shape: &[usize]) -> Result<()> {
        let name = self.name();
        validate_input_shape(&name, input_shape)?;
        let &[features] = input_shape else {
            return Err(Error::invalid_shape(input_shape, "dense input must be (features)"));
        };
        if self.units == 0 {
            return Err(Error::invalid_shape(&[features, 0], "dense units must be positive"));
        }

        let out = [self.units];
        let bias = self.use_bias.then(|| Tensor::zeros(&out)).transpose()?;
        let grad_bias = self.use_bias.then(|| Tensor::zeros(&out)).transpose()?;
        self.state = Some(DenseState {
            input_shape: input_shape.to_vec(),
            output_shape: out.to_vec(),
            batch: None,
            kernel: Tensor::zeros(&[features, self.units])?.with_name("kernel"),
            grad_kernel: Tensor::zeros(&[features, self.units])?.with_name("grad_kernel"),
            bias: bias.map(|b| b.with_name("bias")),
            grad_bias: grad_bias.map(|b| b.with_name("grad_bias")),
            input: Tensor::zeros(input_shape)?.with_name("input"),
            pre_activation: Tensor::zeros(&out)?.with_name("pre_activation"),
            output: Tensor::zeros(&out)?.with_name("output"),
            grad_output: Tensor::zeros(&out)?.with_name("grad_output"),
            grad_input: Tensor::zeros(input_shape)?.with_name("grad_input"),
        });
        self.initialize()?;
        tracing::debug!(layer = %name, features, units = self.units, activation = %self.activation, "constructed");
        Ok(())
    }

    fn is_constructed(&self) -> bool {
        self.state.is_some()
    }

    fn initialize(&mut self) -> Result<()> {
        let mut rng = self.base.rng();
        let (kernel_init, bias_init) = (self.kernel_init, self.bias_init);
        let state = self.state_mut()?;
        kernel_init.fill(&mut state.kernel, &mut rng);
        if let Some(b) = state.bias.as_mut() {
            bias_init.fill(b, &mut rng);
        }
        Ok(())
    }

    fn forward(&mut self, input: &Tensor) -> Result<&Tensor> {
        let name = self.name();
        let state = self.state.as_mut().ok_or_else(|| not_constructed(name.clone()))?;
        let batch = batch_of(&name, input.shape(), &state.input_shape)?;
        state.adjust_for_batch(&name, batch)?;

        state.input.copy_from(input)?;
        dense_forward(&state.input, &state.kernel, state.bias.as_ref(), &mut state.pre_activation)?;
        self.activation.forward(&state.pre_activation, &mut state.output)?;
        Ok(&state.output)
    }

    fn backward(&mut self, grad: &Tensor) -> Result<&Tensor> {
        let name = self.name();
        let state = self.state.as_mut().ok_or_else(|| not_constructed(name))?;
        state.grad_output.copy_from(grad)?;
        self.activation.backward(state)?;

        state.grad_input.zero();
        dense_backward(
            &state.input,
            &state.kernel,
            &state.grad_output,
            &mut state.grad_kernel,
            state.grad_bias.as_mut(),
            &mut state.grad_input,
        )?;
        Ok(&state.grad_input)
    }

    fn zero_gradients(&mut self) -> Result<()> {
        let state = self.state_mut()?;
        state.grad_kernel.zero();
        if let Some(gb) = state.grad_bias.as_mut() {
            gb.zero();
        }
        Ok(())
    }

    fn num_parameters(&self) -> Result<usize> {
        let state = self.state()?;
        Ok(state.kernel.len() + state.bias.as_ref().map_or(0, Tensor::len))
    }

    fn input_shape(&self) -> Result<&[usize]> {
        Ok(&self.state()?.input_shape)
    }

    fn output_shape(&self) -> Result<&[usize]> {
        Ok(&self.state()?.output_shape)
    }

    fn output(&self) -> Result<&Tensor> {
        Ok(&self.state()?.output)
    }

    fn grad_input(&self) -> Result<&Tensor> {
        Ok(&self.state()?.grad_input)
    }

    fn set_training(&mut self, training: bool) {
        self.base.training = training;
    }

    fn is_training(&self) -> bool {
        self.base.training
    }

    fn is_trainable(&self) -> bool {
        self.base.trainable
    }

    fn set_trainable(&mut self, trainable: bool) {
        self.base.trainable = trainable;
    }
}

impl HasKernel for Dense {
    fn kernel(&self) -> Result<&Tensor> {
        Ok(&self.state()?.kernel)
    }

    fn kernel_mut(&mut self) -> Result<&mut Tensor> {
        Ok(&mut self.state_mut()?.kernel)
    }

    fn grad_kernel(&self) -> Result<&Tensor> {
        Ok(&self.state()?.grad_kernel)
    }

    fn kernel_and_grad(&mut self) -> Result<(&mut Tensor, &Tensor)> {
        let state = self.state_mut()?;
        Ok((&mut state.kernel, &state.grad_kernel))
    }
}

impl HasBias for Dense {
    fn has_bias(&self) -> bool {
        self.use_bias
    }

    fn bias(&self) -> Result<&Tensor> {
        self.state()?
            .bias
            .as_ref()
            .ok_or_else(|| unsupported(self.name(), "bias"))
    }

    fn bias_mut(&mut self) -> Result<&mut Tensor> {
        let name = self.name();
        self.state_mut()?
            .bias
            .as_mut()
            .ok_or_else(|| unsupported(name, "bias"))
    }

    fn grad_bias(&self) -> Result<&Tensor> {
        self.state()?
            .grad_bias
            .as_ref()
            .ok_or_else(|| unsupported(self.name(), "grad_bias"))
    }

    fn bias_and_grad(&mut self) -> Result<(&mut Tensor, &Tensor)> {
        let name = self.name();
        let state = self.state_mut()?;
        match (state.bias.as_mut(), state.grad_bias.as_ref()) {
            (Some(b), Some(gb)) => Ok((b, gb)),
            _ => Err(unsupported(name, "bias")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor;

    fn fixed(units: usize, features: usize) -> Dense {
        let mut d = Dense::new(units).kernel_init(Initializer::Constant(0.5)).bias_init(Initializer::Constant(1.0));
        d.construct(&[features]).unwrap();
        d
    }

    #[test]
    fn construct_rejects_bad_shapes() {
        assert!(matches!(Dense::new(2).construct(&[2, 3]), Err(Error::InvalidShape { .. })));
        assert!(matches!(Dense::new(2).construct(&[0]), Err(Error::InvalidShape { .. })));
        assert!(matches!(Dense::new(0).construct(&[3]), Err(Error::InvalidShape { .. })));
    }

    #[test]
    fn forward_single_and_batched() {
        let mut d = fixed(2, 3);
        assert_eq!(d.forward(&tensor!([1.0, 2.0, 3.0])).unwrap().to_vec(), vec![4.0, 4.0]);

        let y = d.forward(&tensor!([[1.0, 1.0, 1.0], [2.0, 2.0, 2.0]])).unwrap();
        assert_eq!(y.shape(), &[2, 2]);
        assert_eq!(y.to_vec(), vec![2.5, 2.5, 4.0, 4.0]);
        assert!(matches!(d.forward(&tensor!([1.0, 2.0])), Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn forward_copies_the_input() {
        let mut d = fixed(1, 2);
        let mut x = tensor!([1.0, 1.0]);
        d.forward(&x).unwrap();
        x.set(100.0, &[0]).unwrap();
        let grad_input = d.backward(&tensor!([1.0])).unwrap().to_vec();
        assert_eq!(grad_input, vec![0.5, 0.5]);
        assert_eq!(d.grad_kernel().unwrap().to_vec(), vec![1.0, 1.0]);
    }

    #[test]
    fn backward_accumulates_parameters_but_not_input() {
        let mut d = fixed(2, 2);
        d.forward(&tensor!([1.0, 2.0])).unwrap();
        d.backward(&tensor!([1.0, -1.0])).unwrap();
        let gi = d.backward(&tensor!([1.0, -1.0])).unwrap().to_vec();
        assert_eq!(gi, vec![0.0, 0.0]);
        assert_eq!(d.grad_kernel().unwrap().to_vec(), vec![2.0, -2.0, 4.0, -4.0]);
        assert_eq!(d.grad_bias().unwrap().to_vec(), vec![2.0, -2.0]);

        d.zero_gradients().unwrap();
        assert!(d.grad_kernel().unwrap().iter().all(|g| g == 0.0));
    }

    #[test]
    fn parameter_count_and_seeded_init() {
        let mut a = Dense::new(4).seed(11);
        let mut b = Dense::new(4).seed(11);
        a.construct(&[3]).unwrap();
        b.construct(&[3]).unwrap();
        assert_eq!(a.num_parameters().unwrap(), 16);
        assert_eq!(a.kernel().unwrap(), b.kernel().unwrap());
        assert_eq!(a.name(), "dense_0");
    }
}
