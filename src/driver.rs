use tracing::info;

use crate::{
    compile::{CompileOptions, NetworkCompiler},
    dataset::DatasetBundle,
    eval::Comparison,
    Result,
};

/// The comparison runs keep their compiled parameters in memory only.
pub const NO_EXPORT: &str = "";

/// Loads the image database at `database_path`, then compiles and evaluates
/// the model twice on it: first quantised for SSSE3, then as the floating
/// point reference.
///
/// Loading failures happen before any compilation. A failing quantised run
/// stops the comparison before the reference run starts.
pub fn run_comparison<C: NetworkCompiler + ?Sized>(
    compiler: &mut C,
    database_path: &str,
    model_path: &str,
) -> Result<Option<Comparison>> {
    let bundle = DatasetBundle::load(database_path)?;

    info!(database = database_path, samples = bundle.len(), "loaded image database");

    let quantised = compiler.compile(&bundle, model_path, NO_EXPORT, &CompileOptions::quantised())?;
    let reference = compiler.compile(&bundle, model_path, NO_EXPORT, &CompileOptions::reference())?;

    match (quantised, reference) {
        (Some(quantised), Some(reference)) => Comparison::new(&quantised, &reference).map(Some),
        _ => Ok(None),
    }
}
