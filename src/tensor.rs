use crate::error::{Result, TideError};
use crate::graph::InvocationId;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

// ===== NDARRAY =====

/// The value + gradient record flowing through a [`Graph`](crate::Graph).
///
/// Fields:
/// - `data`: flat values, `length() * batch_count` of them (row-major per item)
/// - `grad`: accumulated gradient, `None` until the first contribution
/// - `shape`: dimensions of a single batch item
/// - `producer`: invocation that created this tensor, `None` for leaves
/// - `consumer_count`: forward uses not yet matched by a backward visit
/// - `pending_update_count`: backward contributions since the last optimizer step
#[derive(Clone)]
pub struct NdArray {
    pub data: Vec<f32>,
    pub grad: Option<Vec<f32>>,
    pub shape: Vec<usize>,
    pub batch_count: usize,
    pub name: Option<String>,
    pub(crate) producer: Option<InvocationId>,
    pub(crate) consumer_count: usize,
    pub(crate) pending_update_count: usize,
}

impl std::fmt::Debug for NdArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NdArray")
            .field("name", &self.name)
            .field("shape", &self.shape)
            .field("batch_count", &self.batch_count)
            .field("has_grad", &self.grad.is_some())
            .field("producer", &self.producer)
            .field("consumer_count", &self.consumer_count)
            .finish()
    }
}

/// Borrowed view over a tensor's values, handed to kernels.
#[derive(Debug, Clone, Copy)]
pub struct TensorView<'a> {
    pub data: &'a [f32],
    pub shape: &'a [usize],
    pub batch_count: usize,
}

impl<'a> TensorView<'a> {
    /// Elements per batch item
    #[must_use]
    pub fn length(&self) -> usize {
        self.shape.iter().product()
    }

    /// Values of batch item `b`
    #[must_use]
    pub fn item(&self, b: usize) -> &'a [f32] {
        let len = self.length();
        &self.data[b * len..(b + 1) * len]
    }
}

// ===== CONSTRUCTORS =====
impl NdArray {
    /// Zero-filled leaf tensor with no gradient buffer.
    #[must_use]
    pub fn zeros(shape: &[usize], batch_count: usize) -> Self {
        let len = shape.iter().product::<usize>() * batch_count;
        NdArray {
            data: vec![0.0; len],
            grad: None,
            shape: shape.to_vec(),
            batch_count,
            name: None,
            producer: None,
            consumer_count: 0,
            pending_update_count: 0,
        }
    }

    /// Build a tensor from a freshly computed buffer.
    ///
    /// Fails with `ShapeMismatch` if `data.len() != length(shape) * batch_count`.
    pub fn wrap(
        data: Vec<f32>,
        shape: &[usize],
        batch_count: usize,
        producer: Option<InvocationId>,
    ) -> Result<Self> {
        let expected = shape.iter().product::<usize>() * batch_count;
        if data.len() != expected {
            return Err(TideError::shape(
                format!("tensor of shape {shape:?} x {batch_count}"),
                expected,
                data.len(),
            ));
        }
        Ok(NdArray {
            data,
            grad: None,
            shape: shape.to_vec(),
            batch_count,
            name: None,
            producer,
            consumer_count: 0,
            pending_update_count: 0,
        })
    }

    /// Leaf tensor of a single batch item.
    pub fn from_vec(data: Vec<f32>, shape: &[usize]) -> Result<Self> {
        Self::wrap(data, shape, 1, None)
    }

    /// Leaf tensor filled with a constant
    #[must_use]
    pub fn filled(value: f32, shape: &[usize], batch_count: usize) -> Self {
        let mut t = Self::zeros(shape, batch_count);
        t.data.fill(value);
        t
    }

    /// Values drawn from N(0, 1)
    #[must_use]
    pub fn randn(shape: &[usize], batch_count: usize) -> Self {
        let mut t = Self::zeros(shape, batch_count);
        let mut rng = rand::rng();
        for v in &mut t.data {
            *v = rng.sample(StandardNormal);
        }
        t
    }

    /// Xavier uniform initialization for a `[fan_out, fan_in]` weight.
    ///
    /// Samples uniformly from [-limit, limit] where
    /// limit = sqrt(6 / (fan_in + fan_out)).
    #[must_use]
    pub fn xavier_uniform(fan_out: usize, fan_in: usize, seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        let limit = (6.0 / (fan_in + fan_out).max(1) as f32).sqrt();
        let mut t = Self::zeros(&[fan_out, fan_in], 1);
        for v in &mut t.data {
            *v = rng.random_range(-limit..=limit);
        }
        t
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

// ===== ACCESSORS & BOOKKEEPING =====
impl NdArray {
    /// Elements per batch item
    #[must_use]
    pub fn length(&self) -> usize {
        self.shape.iter().product()
    }

    #[must_use]
    pub fn view(&self) -> TensorView<'_> {
        TensorView {
            data: &self.data,
            shape: &self.shape,
            batch_count: self.batch_count,
        }
    }

    #[must_use]
    pub fn producer(&self) -> Option<InvocationId> {
        self.producer
    }

    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.producer.is_none()
    }

    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.consumer_count
    }

    #[must_use]
    pub fn pending_update_count(&self) -> usize {
        self.pending_update_count
    }

    /// Gradient, or zeros when none has been accumulated yet.
    #[must_use]
    pub fn grad_or_zeros(&self) -> Vec<f32> {
        self.grad
            .clone()
            .unwrap_or_else(|| vec![0.0; self.data.len()])
    }

    /// Element-wise add `delta` into the gradient buffer.
    pub fn accumulate_grad(&mut self, delta: &[f32]) -> Result<()> {
        if delta.len() != self.data.len() {
            return Err(TideError::shape(
                "gradient accumulation",
                self.data.len(),
                delta.len(),
            ));
        }
        match self.grad {
            None => self.grad = Some(delta.to_vec()),
            Some(ref mut existing) => {
                for (a, b) in existing.iter_mut().zip(delta) {
                    *a += *b;
                }
            }
        }
        Ok(())
    }

    /// Release the gradient buffer and forget pending contributions.
    pub fn clear_grad(&mut self) {
        self.grad = None;
        self.pending_update_count = 0;
    }

    pub fn mark_consumed(&mut self) {
        self.consumer_count += 1;
    }

    pub fn mark_visited(&mut self) {
        match self.consumer_count.checked_sub(1) {
            Some(n) => self.consumer_count = n,
            None => log::warn!(
                "consumer count underflow on tensor {:?}; visit ignored",
                self.name
            ),
        }
    }

    pub(crate) fn count_update(&mut self) {
        self.pending_update_count += 1;
    }
}
