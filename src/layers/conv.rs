//! Two-dimensional convolution layer.

use super::{HasBias, HasKernel, Layer, LayerBase, batch_of, not_constructed, unsupported, validate_input_shape, with_batch};
use crate::activations::{Activated, Activation};
use crate::backprop::{conv2d_backward, conv2d_forward, conv2d_output_shape};
use crate::error::{Error, Result};
use crate::init::Initializer;
use crate::tensors::Tensor;

/// Valid (unpadded, stride 1) multi-channel convolution.
///
/// Input `(C, H, W)` or `(N, C, H, W)`; kernel `(F, C, kh, kw)`; bias `(F)`;
/// output `(F, H - kh + 1, W - kw + 1)`.
#[derive(Debug)]
pub struct Conv2D {
    base: LayerBase,
    filters: usize,
    kernel_size: [usize; 2],
    activation: Activation,
    use_bias: bool,
    kernel_init: Initializer,
    bias_init: Initializer,
    state: Option<ConvState>,
}

#[derive(Debug)]
struct ConvState {
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

impl ConvState {
    fn adjust_for_batch(&mut self, layer: &str, batch: Option<usize>) -> Result<()> {
        if batch == self.batch {
            return Ok(());
        }
        tracing::trace!(layer, from = ?self.batch, to = ?batch, "relayout for batch");
        let in_shape = with_batch(batch, &self.input_shape);
        let out_shape = with_batch(batch, &self.output_shape);
        self.input = Tensor::zeros(&in_shape)?;
        self.grad_input = Tensor::zeros(&in_shape)?;
        self.pre_activation = Tensor::zeros(&out_shape)?;
        self.output = Tensor::zeros(&out_shape)?;
        self.grad_output = Tensor::zeros(&out_shape)?;
        self.batch = batch;
        Ok(())
    }
}

impl Activated for ConvState {
    fn activation_buffers(&mut self) -> (&Tensor, &Tensor, &mut Tensor) {
        (&self.pre_activation, &self.output, &mut self.grad_output)
    }
}

impl Conv2D {
    pub fn new(filters: usize, kernel_size: [usize; 2]) -> Self {
        Self {
            base: LayerBase::trainable(),
            filters,
            kernel_size,
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

    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.base.seed = Some(seed);
        self
    }

    pub fn filters(&self) -> usize {
        self.filters
    }

    pub fn kernel_size(&self) -> [usize; 2] {
        self.kernel_size
    }

    fn state(&self) -> Result<&ConvState> {
        self.state.as_ref().ok_or_else(|| not_constructed(self.name()))
    }

    fn state_mut(&mut self) -> Result<&mut ConvState> {
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

impl Layer for Conv2D {
    fn kind_name(&self) -> &'static str {
        "conv2d"
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
        let &[channels, _, _] = input_shape else {
            return Err(Error::invalid_shape(input_shape, "conv2d input must be (channels, height, width)"));
        };
        if self.kernel_size.contains(&0) {
            return Err(Error::invalid_shape(&self.kernel_size, "conv2d kernel dimensions must be positive"));
        }
        let output_shape = conv2d_output_shape(input_shape, self.filters, self.kernel_size)?;

        let [kh, kw] = self.kernel_size;
        let kernel_shape = [self.filters, channels, kh, kw];
        let bias = self.use_bias.then(|| Tensor::zeros(&[self.filters])).transpose()?;
        let grad_bias = self.use_bias.then(|| Tensor::zeros(&[self.filters])).transpose()?;
        self.state = Some(ConvState {
            input_shape: input_shape.to_vec(),
            batch: None,
            kernel: Tensor::zeros(&kernel_shape)?.with_name("kernel"),
            grad_kernel: Tensor::zeros(&kernel_shape)?.with_name("grad_kernel"),
            bias: bias.map(|b| b.with_name("bias")),
            grad_bias: grad_bias.map(|b| b.with_name("grad_bias")),
            input: Tensor::zeros(input_shape)?,
            pre_activation: Tensor::zeros(&output_shape)?,
            output: Tensor::zeros(&output_shape)?,
            grad_output: Tensor::zeros(&output_shape)?,
            grad_input: Tensor::zeros(input_shape)?,
            output_shape,
        });
        self.initialize()?;
        tracing::debug!(layer = %name, ?input_shape, filters = self.filters, kernel = ?self.kernel_size, "constructed");
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
        conv2d_forward(&state.input, &state.kernel, state.bias.as_ref(), &mut state.pre_activation)?;
        self.activation.forward(&state.pre_activation, &mut state.output)?;
        Ok(&state.output)
    }

    fn backward(&mut self, grad: &Tensor) -> Result<&Tensor> {
        let name = self.name();
        let state = self.state.as_mut().ok_or_else(|| not_constructed(name))?;
        state.grad_output.copy_from(grad)?;
        self.activation.backward(state)?;

        state.grad_input.zero();
        conv2d_backward(
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

impl HasKernel for Conv2D {
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

impl HasBias for Conv2D {
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
