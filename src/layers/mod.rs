//! The layer contract and concrete layers.
//!
//! A layer starts **unconstructed**. [`Layer::construct`] binds it to an input
//! shape, derives its output shape and allocates every tensor it will ever use;
//! after that the layer is usable for [`Layer::forward`] and [`Layer::backward`].
//! Every other call on an unconstructed layer fails with
//! [`Error::NotConstructed`].
//!
//! Trainable parameters are exposed through the capability traits
//! [`HasKernel`] and [`HasBias`], implemented only by the layers that have
//! them. [`LayerKind`] is the closed set of layers a model can hold; its
//! capability accessors report [`Error::UnsupportedForLayer`] for variants that
//! lack the capability.
//!
//! # Gradient accumulation
//!
//! `backward` adds into the kernel and bias gradients and never clears them.
//! Call [`Layer::zero_gradients`] once per optimizer step.
//!
//! # Batches
//!
//! Layers also accept a batched input with one extra leading dimension. When
//! the batch size changes, batch-shaped buffers are reallocated before the
//! pass, which invalidates previously returned outputs.

mod conv;
mod dense;
mod dropout;
mod flatten;
mod input;
mod pool;

pub use conv::Conv2D;
pub use dense::Dense;
pub use dropout::Dropout;
pub use flatten::Flatten;
pub use input::Input;
pub use pool::Pool2D;

pub use crate::backprop::PoolKind;

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::error::{Error, Result};
use crate::tensors::Tensor;

/// Behavior shared by every layer.
pub trait Layer {
    /// Short type name, e.g. `"dense"`.
    fn kind_name(&self) -> &'static str;

    fn id(&self) -> usize;

    fn set_id(&mut self, id: usize);

    /// Display name combining the type and id, e.g. `"dense_0"`.
    fn name(&self) -> String {
        format!("{}_{}", self.kind_name(), self.id())
    }

    /// Validates `input_shape` (without a batch dimension) and allocates all tensors.
    ///
    /// # Errors
    /// [`Error::InvalidShape`] for malformed shapes or a non-positive derived
    /// output dimension, [`Error::InvalidParameter`] for a bad configuration.
    fn construct(&mut self, input_shape: &[usize]) -> Result<()>;

    fn is_constructed(&self) -> bool;

    /// Refills the parameters from the configured initializers.
    fn initialize(&mut self) -> Result<()> {
        self.ensure_constructed()
    }

    /// Runs the layer on a copy of `input` and returns the reusable output.
    fn forward(&mut self, input: &Tensor) -> Result<&Tensor>;

    /// Propagates `grad` (the loss gradient w.r.t. the output), accumulating
    /// parameter gradients, and returns the gradient w.r.t. the input.
    fn backward(&mut self, grad: &Tensor) -> Result<&Tensor>;

    /// Clears accumulated parameter gradients.
    fn zero_gradients(&mut self) -> Result<()> {
        self.ensure_constructed()
    }

    fn num_parameters(&self) -> Result<usize> {
        self.ensure_constructed().map(|()| 0)
    }

    /// Input shape without a batch dimension.
    fn input_shape(&self) -> Result<&[usize]>;

    /// Output shape without a batch dimension.
    fn output_shape(&self) -> Result<&[usize]>;

    /// The tensor returned by the last `forward`.
    fn output(&self) -> Result<&Tensor>;

    /// The tensor returned by the last `backward`.
    fn grad_input(&self) -> Result<&Tensor>;

    fn set_training(&mut self, training: bool);

    fn is_training(&self) -> bool;

    /// Whether optimizers should update this layer.
    fn is_trainable(&self) -> bool {
        false
    }

    fn set_trainable(&mut self, _trainable: bool) {}

    /// Fails with [`Error::NotConstructed`] before `construct`.
    fn ensure_constructed(&self) -> Result<()> {
        if self.is_constructed() {
            Ok(())
        } else {
            Err(Error::NotConstructed { layer: self.name() })
        }
    }
}

/// Layers with a weight tensor.
pub trait HasKernel: Layer {
    fn kernel(&self) -> Result<&Tensor>;

    fn kernel_mut(&mut self) -> Result<&mut Tensor>;

    fn grad_kernel(&self) -> Result<&Tensor>;

    /// Kernel and its gradient, borrowed together for optimizer updates.
    fn kernel_and_grad(&mut self) -> Result<(&mut Tensor, &Tensor)>;
}

/// Layers with an optional bias tensor.
pub trait HasBias: Layer {
    fn has_bias(&self) -> bool;

    /// # Errors
    /// [`Error::UnsupportedForLayer`] when the bias is disabled.
    fn bias(&self) -> Result<&Tensor>;

    fn bias_mut(&mut self) -> Result<&mut Tensor>;

    fn grad_bias(&self) -> Result<&Tensor>;

    fn bias_and_grad(&mut self) -> Result<(&mut Tensor, &Tensor)>;
}

/// State every layer carries regardless of type.
#[derive(Debug, Clone, Default)]
pub(crate) struct LayerBase {
    pub(crate) id: usize,
    pub(crate) training: bool,
    pub(crate) trainable: bool,
    pub(crate) seed: Option<u64>,
}

impl LayerBase {
    pub(crate) fn trainable() -> Self {
        Self {
            trainable: true,
            ..Self::default()
        }
    }

    /// A generator seeded from the configured seed, or from OS entropy.
    pub(crate) fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }
}

pub(crate) fn not_constructed(layer: String) -> Error {
    Error::NotConstructed { layer }
}

pub(crate) fn unsupported(layer: String, capability: &'static str) -> Error {
    Error::UnsupportedForLayer { layer, capability }
}

/// Inputs must be `sample` or `(N, ..sample)`; returns the batch size if batched.
pub(crate) fn batch_of(layer: &str, input: &[usize], sample: &[usize]) -> Result<Option<usize>> {
    if input == sample {
        Ok(None)
    } else if input.len() == sample.len() + 1 && &input[1..] == sample {
        Ok(Some(input[0]))
    } else {
        tracing::trace!(layer, ?input, ?sample, "rejected input shape");
        Err(Error::ShapeMismatch {
            op: "forward",
            expected: sample.to_vec(),
            actual: input.to_vec(),
        })
    }
}

/// `sample` with a leading batch dimension when `batch` is set.
pub(crate) fn with_batch(batch: Option<usize>, sample: &[usize]) -> Vec<usize> {
    match batch {
        Some(n) => std::iter::once(n).chain(sample.iter().copied()).collect(),
        None => sample.to_vec(),
    }
}

/// Validates a construction shape and logs the rejection.
pub(crate) fn validate_input_shape(layer: &str, shape: &[usize]) -> Result<()> {
    crate::tensors::checked_len(shape).map(drop).inspect_err(|e| {
        tracing::debug!(layer, error = %e, "construct rejected input shape");
    })
}

/// The closed set of layer types.
#[derive(Debug)]
pub enum LayerKind {
    Input(Input),
    Dense(Dense),
    Conv2D(Conv2D),
    Pooling(Pool2D),
    Dropout(Dropout),
    Flatten(Flatten),
}

macro_rules! each_layer {
    ($value:expr, $layer:ident => $body:expr) => {
        match $value {
            LayerKind::Input($layer) => $body,
            LayerKind::Dense($layer) => $body,
            LayerKind::Conv2D($layer) => $body,
            LayerKind::Pooling($layer) => $body,
            LayerKind::Dropout($layer) => $body,
            LayerKind::Flatten($layer) => $body,
        }
    };
}

impl Layer for LayerKind {
    fn kind_name(&self) -> &'static str {
        each_layer!(self, l => l.kind_name())
    }

    fn id(&self) -> usize {
        each_layer!(self, l => l.id())
    }

    fn set_id(&mut self, id: usize) {
        each_layer!(self, l => l.set_id(id))
    }

    fn construct(&mut self, input_shape: &[usize]) -> Result<()> {
        each_layer!(self, l => l.construct(input_shape))
    }

    fn is_constructed(&self) -> bool {
        each_layer!(self, l => l.is_constructed())
    }

    fn initialize(&mut self) -> Result<()> {
        each_layer!(self, l => l.initialize())
    }

    fn forward(&mut self, input: &Tensor) -> Result<&Tensor> {
        each_layer!(self, l => l.forward(input))
    }

    fn backward(&mut self, grad: &Tensor) -> Result<&Tensor> {
        each_layer!(self, l => l.backward(grad))
    }

    fn zero_gradients(&mut self) -> Result<()> {
        each_layer!(self, l => l.zero_gradients())
    }

    fn num_parameters(&self) -> Result<usize> {
        each_layer!(self, l => l.num_parameters())
    }

    fn input_shape(&self) -> Result<&[usize]> {
        each_layer!(self, l => l.input_shape())
    }

    fn output_shape(&self) -> Result<&[usize]> {
        each_layer!(self, l => l.output_shape())
    }

    fn output(&self) -> Result<&Tensor> {
        each_layer!(self, l => l.output())
    }

    fn grad_input(&self) -> Result<&Tensor> {
        each_layer!(self, l => l.grad_input())
    }

    fn set_training(&mut self, training: bool) {
        each_layer!(self, l => l.set_training(training))
    }

    fn is_training(&self) -> bool {
        each_layer!(self, l => l.is_training())
    }

    fn is_trainable(&self) -> bool {
        each_layer!(self, l => l.is_trainable())
    }

    fn set_trainable(&mut self, trainable: bool) {
        each_layer!(self, l => l.set_trainable(trainable))
    }
}

impl LayerKind {
    /// The layer as a [`HasKernel`], if it has one.
    pub fn as_kernel(&self) -> Option<&dyn HasKernel> {
        match self {
            LayerKind::Dense(d) => Some(d),
            LayerKind::Conv2D(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_kernel_mut(&mut self) -> Option<&mut dyn HasKernel> {
        match self {
            LayerKind::Dense(d) => Some(d),
            LayerKind::Conv2D(c) => Some(c),
            _ => None,
        }
    }

    /// The layer as a [`HasBias`], if it has a bias slot (enabled or not).
    pub fn as_bias(&self) -> Option<&dyn HasBias> {
        match self {
            LayerKind::Dense(d) => Some(d),
            LayerKind::Conv2D(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_bias_mut(&mut self) -> Option<&mut dyn HasBias> {
        match self {
            LayerKind::Dense(d) => Some(d),
            LayerKind::Conv2D(c) => Some(c),
            _ => None,
        }
    }

    pub fn kernel(&self) -> Result<&Tensor> {
        self.as_kernel()
            .ok_or_else(|| unsupported(self.name(), "kernel"))?
            .kernel()
    }

    pub fn grad_kernel(&self) -> Result<&Tensor> {
        self.as_kernel()
            .ok_or_else(|| unsupported(self.name(), "grad_kernel"))?
            .grad_kernel()
    }

    pub fn bias(&self) -> Result<&Tensor> {
        self.as_bias()
            .ok_or_else(|| unsupported(self.name(), "bias"))?
            .bias()
    }

    pub fn grad_bias(&self) -> Result<&Tensor> {
        self.as_bias()
            .ok_or_else(|| unsupported(self.name(), "grad_bias"))?
            .grad_bias()
    }

    /// Every parameter paired with its gradient: kernel first, then bias.
    pub fn parameters_and_grads(&mut self) -> Result<Vec<(&mut Tensor, &Tensor)>> {
        match self {
            LayerKind::Dense(d) => d.parameters_and_grads(),
            LayerKind::Conv2D(c) => c.parameters_and_grads(),
            _ => Ok(Vec::new()),
        }
    }

    /// Parameters in save order: kernel first, then bias when enabled.
    pub fn parameters(&self) -> Result<Vec<&Tensor>> {
        let mut params = Vec::new();
        if let Some(k) = self.as_kernel() {
            params.push(k.kernel()?);
        }
        if let Some(b) = self.as_bias().filter(|b| b.has_bias()) {
            params.push(b.bias()?);
        }
        Ok(params)
    }
}

macro_rules! impl_from_layer {
    ($($variant:ident($ty:ty)),+ $(,)?) => {
        $(impl From<$ty> for LayerKind {
            fn from(layer: $ty) -> Self {
                LayerKind::$variant(layer)
            }
        })+
    };
}

impl_from_layer!(
    Input(Input),
    Dense(Dense),
    Conv2D(Conv2D),
    Pooling(Pool2D),
    Dropout(Dropout),
    Flatten(Flatten),
);
