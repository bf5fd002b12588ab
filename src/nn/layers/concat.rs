use crate::error::{Result, TideError};
use crate::function::{Arity, BackwardArgs, Kernel, KernelGrads, KernelOutput};
use crate::nn::layers::LayerKind;
use crate::tensor::TensorView;

/// Concatenate inputs along the first per-item axis.
///
/// All inputs share the batch count and every trailing dimension.
#[derive(Debug, Clone, Copy, Default)]
pub struct Concat;

/// Split the input along the first per-item axis into `sections` pieces.
#[derive(Debug, Clone)]
pub struct Split {
    sections: Vec<usize>,
}

impl Split {
    #[must_use]
    pub fn new(sections: Vec<usize>) -> Self {
        Split { sections }
    }

    #[must_use]
    pub fn sections(&self) -> &[usize] {
        &self.sections
    }
}

/// Elements per unit of the leading axis, and that axis' extent.
fn leading(shape: &[usize]) -> (usize, usize) {
    match shape.split_first() {
        Some((&rows, rest)) => (rows, rest.iter().product()),
        None => (1, 1),
    }
}

impl Kernel for Concat {
    fn name(&self) -> &str {
        "Concat"
    }

    fn arity(&self) -> Arity {
        Arity::MultiInput
    }

    fn forward(
        &self,
        inputs: &[TensorView<'_>],
        _params: &[TensorView<'_>],
    ) -> Result<Vec<KernelOutput>> {
        let first = &inputs[0];
        let tail = first.shape.get(1..).unwrap_or(&[]);
        let mut rows = 0;
        for x in inputs {
            if x.batch_count != first.batch_count || x.shape.get(1..).unwrap_or(&[]) != tail {
                return Err(TideError::shape(
                    format!(
                        "Concat: {:?} x {} vs {:?} x {}",
                        first.shape, first.batch_count, x.shape, x.batch_count
                    ),
                    first.length(),
                    x.length(),
                ));
            }
            rows += leading(x.shape).0;
        }

        let mut data = Vec::with_capacity(inputs.iter().map(|x| x.data.len()).sum());
        for b in 0..first.batch_count {
            for x in inputs {
                data.extend_from_slice(x.item(b));
            }
        }
        let mut shape = vec![rows];
        shape.extend_from_slice(tail);
        Ok(vec![KernelOutput {
            data,
            shape,
            batch_count: first.batch_count,
        }])
    }

    fn backward(&self, args: &BackwardArgs<'_>) -> Result<KernelGrads> {
        let gy = &args.output_grads[0];
        let mut grads: Vec<Vec<f32>> = args
            .inputs
            .iter()
            .map(|x| Vec::with_capacity(x.data.len()))
            .collect();
        let mut offset = 0;
        for _ in 0..args.outputs[0].batch_count {
            for (x, g) in args.inputs.iter().zip(&mut grads) {
                let len = x.length();
                g.extend_from_slice(&gy[offset..offset + len]);
                offset += len;
            }
        }
        Ok(KernelGrads {
            inputs: grads.into_iter().map(Some).collect(),
            params: Vec::new(),
        })
    }

    fn kind(&self) -> LayerKind {
        LayerKind::Concat
    }
}

impl Kernel for Split {
    fn name(&self) -> &str {
        "Split"
    }

    fn arity(&self) -> Arity {
        Arity::MultiOutput
    }

    fn forward(
        &self,
        inputs: &[TensorView<'_>],
        _params: &[TensorView<'_>],
    ) -> Result<Vec<KernelOutput>> {
        let x = &inputs[0];
        let (rows, stride) = leading(x.shape);
        let total: usize = self.sections.iter().sum();
        if total != rows || self.sections.is_empty() {
            return Err(TideError::shape(
                format!("Split {:?} of shape {:?}", self.sections, x.shape),
                rows,
                total,
            ));
        }
        let tail = x.shape.get(1..).unwrap_or(&[]);
        let mut outputs: Vec<KernelOutput> = self
            .sections
            .iter()
            .map(|&n| {
                let mut shape = vec![n];
                shape.extend_from_slice(tail);
                KernelOutput {
                    data: Vec::with_capacity(n * stride * x.batch_count),
                    shape,
                    batch_count: x.batch_count,
                }
            })
            .collect();
        for b in 0..x.batch_count {
            let mut item = x.item(b);
            for (out, &n) in outputs.iter_mut().zip(&self.sections) {
                let (head, rest) = item.split_at(n * stride);
                out.data.extend_from_slice(head);
                item = rest;
            }
        }
        Ok(outputs)
    }

    fn backward(&self, args: &BackwardArgs<'_>) -> Result<KernelGrads> {
        let x = &args.inputs[0];
        let mut gx = Vec::with_capacity(x.data.len());
        for b in 0..x.batch_count {
            for (out, g) in args.outputs.iter().zip(args.output_grads) {
                let len = out.length();
                gx.extend_from_slice(&g[b * len..(b + 1) * len]);
            }
        }
        Ok(KernelGrads {
            inputs: vec![Some(gx)],
            params: Vec::new(),
        })
    }

    fn kind(&self) -> LayerKind {
        LayerKind::Split {
            sections: self.sections.clone(),
        }
    }
}
