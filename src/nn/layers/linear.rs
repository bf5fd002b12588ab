use crate::device::Device;
use crate::error::{Result, TideError};
use crate::function::{Arity, BackwardArgs, Function, Kernel, KernelGrads, KernelOutput};
use crate::nn::layers::LayerKind;
use crate::ops::AffineRoutines;
use crate::tensor::{NdArray, TensorView};

/// Fully-connected (dense/linear) layer
///
/// Computes: y = Wx + b per batch item
/// where x has `in_features` elements (any per-item shape, read flat),
/// W is `[out_features, in_features]` and b is `[out_features]`.
///
/// Parameters: `#0` weight, `#1` bias (when enabled). Accepts a fused activation.
#[derive(Debug)]
pub struct Linear {
    in_features: usize,
    out_features: usize,
    bias: bool,
    routines: AffineRoutines,
}

impl Linear {
    /// The bare kernel, with routines resolved for `device`.
    pub fn kernel(
        in_features: usize,
        out_features: usize,
        bias: bool,
        device: &Device,
    ) -> Result<Self> {
        if in_features == 0 || out_features == 0 {
            return Err(TideError::InvalidParameter(format!(
                "linear layer needs non-zero features, got {in_features} -> {out_features}"
            )));
        }
        Ok(Linear {
            in_features,
            out_features,
            bias,
            routines: AffineRoutines::for_device(device),
        })
    }

    /// A CPU linear function with Xavier-uniform weights and zero bias.
    ///
    /// `seed` makes the initialization reproducible.
    pub fn layer(
        in_features: usize,
        out_features: usize,
        bias: bool,
        seed: Option<u64>,
    ) -> Result<Function> {
        Self::layer_on(in_features, out_features, bias, seed, &Device::Cpu)
    }

    pub fn layer_on(
        in_features: usize,
        out_features: usize,
        bias: bool,
        seed: Option<u64>,
        device: &Device,
    ) -> Result<Function> {
        let weight = NdArray::xavier_uniform(out_features, in_features, seed).with_name("weight");
        let mut params = vec![weight];
        if bias {
            params.push(NdArray::zeros(&[out_features], 1).with_name("bias"));
        }
        Self::from_params(in_features, out_features, params, device)
    }

    /// A linear function from pre-populated weights, e.g. handed over by a model importer.
    pub fn from_weights(
        weight: Vec<f32>,
        bias: Option<Vec<f32>>,
        in_features: usize,
        out_features: usize,
    ) -> Result<Function> {
        let mut params =
            vec![NdArray::from_vec(weight, &[out_features, in_features])?.with_name("weight")];
        if let Some(b) = bias {
            params.push(NdArray::from_vec(b, &[out_features])?.with_name("bias"));
        }
        Self::from_params(in_features, out_features, params, &Device::Cpu)
    }

    pub(crate) fn from_params(
        in_features: usize,
        out_features: usize,
        params: Vec<NdArray>,
        device: &Device,
    ) -> Result<Function> {
        let expected = [in_features * out_features, out_features];
        for (p, &len) in params.iter().zip(&expected) {
            if p.data.len() != len {
                return Err(TideError::shape("linear parameter", len, p.data.len()));
            }
        }
        let bias = params.len() > 1;
        let kernel = Self::kernel(in_features, out_features, bias, device)?;
        Ok(Function::new(kernel, params))
    }

    /// Weight and optional bias, checked against the layer's features.
    fn weights<'a>(
        &self,
        params: &[TensorView<'a>],
    ) -> Result<(&'a [f32], Option<&'a [f32]>)> {
        let expected = if self.bias { 2 } else { 1 };
        if params.len() != expected {
            return Err(TideError::InvalidParameter(format!(
                "Linear expects {expected} parameters, got {}",
                params.len()
            )));
        }
        let w = params[0].data;
        if w.len() != self.in_features * self.out_features {
            return Err(TideError::shape(
                "Linear weight",
                self.in_features * self.out_features,
                w.len(),
            ));
        }
        let bias = params.get(1).map(|b| b.data);
        if let Some(b) = bias
            && b.len() != self.out_features
        {
            return Err(TideError::shape("Linear bias", self.out_features, b.len()));
        }
        Ok((w, bias))
    }

    fn check_input(&self, x: &TensorView<'_>) -> Result<()> {
        if x.length() != self.in_features {
            return Err(TideError::shape(
                format!("Linear input of shape {:?}", x.shape),
                self.in_features,
                x.length(),
            ));
        }
        Ok(())
    }
}

impl Kernel for Linear {
    fn name(&self) -> &str {
        "Linear"
    }

    fn arity(&self) -> Arity {
        Arity::SingleInput
    }

    fn forward(
        &self,
        inputs: &[TensorView<'_>],
        params: &[TensorView<'_>],
    ) -> Result<Vec<KernelOutput>> {
        let x = &inputs[0];
        self.check_input(x)?;
        let (w, bias) = self.weights(params)?;
        let mut y = vec![0.0; self.out_features * x.batch_count];
        (self.routines.forward)(x.data, w, bias, &mut y, self.in_features, self.out_features);
        Ok(vec![KernelOutput {
            data: y,
            shape: vec![self.out_features],
            batch_count: x.batch_count,
        }])
    }

    fn backward(&self, args: &BackwardArgs<'_>) -> Result<KernelGrads> {
        let x = &args.inputs[0];
        self.check_input(x)?;
        let gy = &args.output_grads[0];
        let (w, _) = self.weights(args.params)?;

        let mut gx = vec![0.0; x.data.len()];
        (self.routines.input_grad)(gy, w, &mut gx, self.in_features, self.out_features);

        let mut gw = vec![0.0; w.len()];
        let mut gb = self.bias.then(|| vec![0.0; self.out_features]);
        (self.routines.weight_grad)(
            gy,
            x.data,
            &mut gw,
            gb.as_deref_mut(),
            self.in_features,
            self.out_features,
        );

        let mut params = vec![Some(gw)];
        if let Some(gb) = gb {
            params.push(Some(gb));
        }
        Ok(KernelGrads {
            inputs: vec![Some(gx)],
            params,
        })
    }

    fn accepts_activation(&self) -> bool {
        true
    }

    fn kind(&self) -> LayerKind {
        LayerKind::Linear {
            in_features: self.in_features,
            out_features: self.out_features,
            bias: self.bias,
        }
    }
}
