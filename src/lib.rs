pub mod compile;
pub mod dataset;
pub mod driver;
mod error;
pub mod eval;
pub mod network;
pub mod npy;
pub mod quantise;
pub mod rng;
pub mod simd;
mod util;

pub use compile::{Arch, CompileOptions, Compiled, NativeCompiler, NetworkCompiler};
pub use dataset::{Array, DatasetBundle};
pub use driver::run_comparison;
pub use error::{Error, Result};
pub use eval::{Comparison, EvalReport};
pub use network::{Activation, Layer, Network, Padding, Shape};

/// Image database used when no path is given.
pub const DEFAULT_DATABASE_PATH: &str = "img.db";

/// Model used when no path is given.
pub const DEFAULT_MODEL_PATH: &str = "model.h5";

/// Appended to the database path to locate the image tensor.
pub const IMAGES_SUFFIX: &str = ".x";

/// Unrolling degree shared by the quantised and the reference run.
pub const UNROLL_LEVEL: usize = 2;
