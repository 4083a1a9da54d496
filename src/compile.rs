use std::{fmt, path::Path, str::FromStr, time::Instant};

use tracing::{debug, info};

use crate::{
    dataset::DatasetBundle,
    eval::EvalReport,
    network::{Layer, Network, Shape},
    quantise::{QuantTarget, QuantisedNetwork},
    simd::{self, Kernels},
    util, Error, Result, UNROLL_LEVEL,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arch {
    General,
    Ssse3,
}

impl Arch {
    /// Whether the running CPU can execute kernels for this architecture.
    pub fn is_supported(self) -> bool {
        match self {
            Self::General => true,
            Self::Ssse3 => simd::ssse3_detected(),
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::General => write!(f, "general"),
            Self::Ssse3 => write!(f, "ssse3"),
        }
    }
}

impl FromStr for Arch {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "general" => Ok(Self::General),
            "ssse3" => Ok(Self::Ssse3),
            _ => Err(Error::Options(format!("unknown architecture `{s}`, expected `general` or `ssse3`"))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompileOptions {
    pub unroll_level: usize,
    pub arch: Arch,
    pub quantize: bool,
    /// Run the compiled network over the dataset.
    pub eval: bool,
}

impl CompileOptions {
    /// 8-bit SSSE3 run.
    pub fn quantised() -> Self {
        Self { unroll_level: UNROLL_LEVEL, arch: Arch::Ssse3, quantize: true, eval: true }
    }

    /// Floating point reference run.
    pub fn reference() -> Self {
        Self { unroll_level: UNROLL_LEVEL, arch: Arch::General, quantize: false, eval: true }
    }
}

/// Compiles a network and optionally evaluates it on a dataset.
pub trait NetworkCompiler {
    /// `export_path` names a file receiving the compiled parameters, an empty
    /// string skips the export. Returns a report when `options.eval` is set.
    fn compile(
        &mut self,
        bundle: &DatasetBundle,
        model_path: &str,
        export_path: &str,
        options: &CompileOptions,
    ) -> Result<Option<EvalReport>>;
}

/// Network in its executable form.
#[derive(Clone, Debug, PartialEq)]
pub enum Compiled {
    Float(Network),
    Quantised(QuantisedNetwork),
}

impl Compiled {
    pub fn new(network: Network, quantize: bool) -> Result<Self> {
        if quantize {
            Ok(Self::Quantised(QuantisedNetwork::from_unquantised(network)?))
        } else {
            Ok(Self::Float(network))
        }
    }

    pub fn input_shape(&self) -> Shape {
        match self {
            Self::Float(network) => network.input_shape(),
            Self::Quantised(network) => network.input_shape(),
        }
    }

    pub fn output_shape(&self) -> Shape {
        match self {
            Self::Float(network) => network.output_shape(),
            Self::Quantised(network) => network.output_shape(),
        }
    }

    pub fn forward(&self, input: &[f32], kernels: &Kernels) -> Result<Vec<f32>> {
        match self {
            Self::Float(network) => network.forward(input, kernels),
            Self::Quantised(network) => network.forward(input, kernels),
        }
    }

    /// Writes the parameters in execution order: `f32` weights and biases
    /// for a float network, scales, `i8` weights and biases otherwise.
    pub fn export(&self, path: &Path) -> Result<()> {
        let bytes = match self {
            Self::Float(network) => {
                let mut bytes = Vec::new();
                for layer in network.layers() {
                    let (weights, bias) = match layer {
                        Layer::Conv2d(conv) => (&conv.weights, &conv.bias),
                        Layer::Dense(dense) => (&dense.weights, &dense.bias),
                        Layer::MaxPool2d { .. } | Layer::Flatten => continue,
                    };
                    bytes.extend(QuantTarget::Float.quantise(weights)?);
                    bytes.extend(QuantTarget::Float.quantise(bias)?);
                }
                bytes
            }
            Self::Quantised(network) => network.to_bytes()?,
        };

        util::write_to_bin(&bytes, path, true)
    }

    /// Runs every normalised sample of `bundle` through the network.
    pub fn evaluate(&self, bundle: &DatasetBundle, kernels: &Kernels) -> Result<EvalReport> {
        let input = self.input_shape();
        let sample_shape = bundle.sample_shape();
        let matches = match (input, sample_shape) {
            (Shape::Image { height, width, channels: 1 }, &[h, w]) => (h, w) == (height, width),
            (Shape::Image { height, width, channels }, &[h, w, c]) => (h, w, c) == (height, width, channels),
            _ => false,
        };

        if !matches {
            return Err(Error::Shape(format!("network expects {input} images, dataset holds {sample_shape:?}")));
        }

        let outputs = self.output_shape().size();
        let mut predictions = Vec::with_capacity(bundle.len() * outputs);

        for idx in 0..bundle.len() {
            predictions.extend(self.forward(&bundle.sample(idx), kernels)?);
        }

        EvalReport::new(predictions, outputs, bundle.y())
    }
}

/// Compiles networks stored in the native model format.
#[derive(Clone, Copy, Debug, Default)]
pub struct NativeCompiler;

impl NetworkCompiler for NativeCompiler {
    fn compile(
        &mut self,
        bundle: &DatasetBundle,
        model_path: &str,
        export_path: &str,
        options: &CompileOptions,
    ) -> Result<Option<EvalReport>> {
        info!(
            model = model_path,
            arch = %options.arch,
            quantize = options.quantize,
            unroll = options.unroll_level,
            "compiling network"
        );

        let kernels = Kernels::new(options.arch, options.unroll_level)?;
        let compiled = Compiled::new(Network::load(model_path)?, options.quantize)?;

        if !export_path.is_empty() {
            compiled.export(Path::new(export_path))?;
            debug!(path = export_path, "exported compiled parameters");
        }

        if !options.eval {
            return Ok(None);
        }

        let timer = Instant::now();
        let report = compiled.evaluate(bundle, &kernels)?;

        let kind = if options.quantize { "Quantised" } else { "Float" };
        println!("[{kind} | {} | unroll {}] {report}", kernels.arch(), kernels.unroll());
        debug!(seconds = timer.elapsed().as_secs_f32(), "evaluation finished");

        Ok(Some(report))
    }
}
