//! Binary persistence of function stacks.
//!
//! A saved stack records, per layer, the kernel descriptor, the fused
//! activation, the parameter contents and the optimizer config driving it.
//! Loading rebuilds every kernel from its descriptor, which rebinds its
//! forward and backward routines for the requested device. Optimizer state
//! (moments, step counts) is not saved.

use crate::device::Device;
use crate::error::{Result, TideError};
use crate::graph::Graph;
use crate::nn::layers::{ActivationKind, LayerKind};
use crate::nn::optim::{Accumulation, Optimizer, OptimizerConfig};
use crate::nn::stack::FunctionStack;
use crate::tensor::NdArray;
use bincode::{Decode, Encode, config};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

const FORMAT_VERSION: u32 = 1;

/// Serializable parameter contents
#[derive(Debug, Encode, Decode, Clone, PartialEq)]
pub struct TensorData {
    pub data: Vec<f32>,
    pub shape: Vec<usize>,
    pub name: Option<String>,
}

impl TensorData {
    #[must_use]
    pub fn from_tensor(t: &NdArray) -> Self {
        TensorData {
            data: t.data.clone(),
            shape: t.shape.clone(),
            name: t.name.clone(),
        }
    }

    pub fn to_tensor(&self) -> Result<NdArray> {
        let t = NdArray::from_vec(self.data.clone(), &self.shape)?;
        Ok(match &self.name {
            Some(name) => t.with_name(name.clone()),
            None => t,
        })
    }
}

#[derive(Debug, Encode, Decode, Clone, PartialEq)]
pub struct OptimizerRecord {
    pub config: OptimizerConfig,
    pub accumulation: Accumulation,
}

/// One stack entry
#[derive(Debug, Encode, Decode, Clone, PartialEq)]
pub struct FunctionRecord {
    pub entry: Option<String>,
    pub function: String,
    pub kind: LayerKind,
    pub activation: Option<ActivationKind>,
    pub params: Vec<TensorData>,
    pub optimizer: Option<OptimizerRecord>,
}

#[derive(Debug, Encode, Decode, Clone, PartialEq)]
pub struct StackRecord {
    pub version: u32,
    pub layers: Vec<FunctionRecord>,
}

impl StackRecord {
    /// Snapshot every layer of `stack`.
    pub fn capture(graph: &Graph, stack: &FunctionStack) -> Result<Self> {
        let layers = stack
            .entries()
            .iter()
            .map(|entry| {
                let f = graph.function(entry.function)?;
                Ok(FunctionRecord {
                    entry: entry.name.clone(),
                    function: f.name().to_string(),
                    kind: f.kernel().kind(),
                    activation: f.activation().map(|a| a.kind()),
                    params: f.params().iter().map(TensorData::from_tensor).collect(),
                    optimizer: stack.optimizer(entry.function).map(|opt| OptimizerRecord {
                        config: opt.config(),
                        accumulation: opt.accumulation(),
                    }),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(StackRecord {
            version: FORMAT_VERSION,
            layers,
        })
    }

    /// Register every layer in `graph` and rebuild the stack around them.
    pub fn restore(&self, graph: &mut Graph, device: &Device) -> Result<FunctionStack> {
        if self.version != FORMAT_VERSION {
            return Err(TideError::Serialization(format!(
                "unsupported stack format version {} (expected {FORMAT_VERSION})",
                self.version
            )));
        }
        let mut stack = FunctionStack::default();
        for layer in &self.layers {
            let params = layer
                .params
                .iter()
                .map(TensorData::to_tensor)
                .collect::<Result<Vec<_>>>()?;
            let mut function = layer.kind.instantiate(params, device)?.named(&layer.function);
            if let Some(act) = layer.activation {
                function.set_activation(act.build())?;
            }
            let fid = graph.add_function(function);
            stack.push(layer.entry.clone(), fid);
            if let Some(record) = &layer.optimizer {
                let mut opt =
                    Optimizer::from_config(&record.config).with_accumulation(record.accumulation);
                opt.bind(graph, fid)?;
                stack.add_optimizer(fid, opt);
            }
        }
        Ok(stack)
    }
}

pub fn encode_stack(graph: &Graph, stack: &FunctionStack) -> Result<Vec<u8>> {
    let record = StackRecord::capture(graph, stack)?;
    bincode::encode_to_vec(&record, config::standard())
        .map_err(|e| TideError::Serialization(e.to_string()))
}

pub fn decode_stack(bytes: &[u8], graph: &mut Graph, device: &Device) -> Result<FunctionStack> {
    let (record, _): (StackRecord, _) = bincode::decode_from_slice(bytes, config::standard())
        .map_err(|e| TideError::Serialization(e.to_string()))?;
    record.restore(graph, device)
}

pub fn save_stack(graph: &Graph, stack: &FunctionStack, path: impl AsRef<Path>) -> Result<()> {
    let encoded = encode_stack(graph, stack)?;
    let mut file = File::create(path.as_ref())?;
    file.write_all(&encoded)?;
    log::info!(
        "saved {} layers ({} bytes) to {}",
        stack.len(),
        encoded.len(),
        path.as_ref().display()
    );
    Ok(())
}

pub fn load_stack(
    graph: &mut Graph,
    path: impl AsRef<Path>,
    device: &Device,
) -> Result<FunctionStack> {
    let mut file = File::open(path.as_ref())?;
    let mut buffer = Vec::new();
    file.read_to_end(&mut buffer)?;
    let stack = decode_stack(&buffer, graph, device)?;
    log::info!("loaded {} layers from {}", stack.len(), path.as_ref().display());
    Ok(stack)
}
