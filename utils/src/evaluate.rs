use anyhow::Context;
use qnet::{Arch, CompileOptions, DatasetBundle, NativeCompiler, NetworkCompiler};
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(about = "Evaluate a single compilation of a network on an image database.")]
pub struct EvaluateOptions {
    #[structopt(short = "b", long = "database-path", default_value = "img.db")]
    database_path: String,
    #[structopt(short = "m", long = "model-path", default_value = "model.h5")]
    model_path: String,
    /// Either `general` or `ssse3`.
    #[structopt(long, default_value = "general")]
    arch: Arch,
    #[structopt(long, default_value = "2")]
    unroll: usize,
    #[structopt(long)]
    quantise: bool,
    /// Also write the compiled parameters to this file.
    #[structopt(long, default_value = "")]
    export: String,
}

impl EvaluateOptions {
    fn compile_options(&self) -> CompileOptions {
        CompileOptions { unroll_level: self.unroll, arch: self.arch, quantize: self.quantise, eval: true }
    }

    pub fn run(&self) -> anyhow::Result<()> {
        let bundle = DatasetBundle::load(&self.database_path)
            .with_context(|| format!("Failed to load `{}`.", self.database_path))?;

        NativeCompiler
            .compile(&bundle, &self.model_path, &self.export, &self.compile_options())
            .with_context(|| format!("Failed to evaluate `{}`.", self.model_path))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_become_compile_options() {
        let options = EvaluateOptions::from_iter_safe(["evaluate", "--arch", "ssse3", "--unroll", "4", "--quantise"])
            .unwrap();

        assert_eq!(
            options.compile_options(),
            CompileOptions { unroll_level: 4, arch: Arch::Ssse3, quantize: true, eval: true }
        );
        assert_eq!(options.export, "");

        let options = EvaluateOptions::from_iter_safe(["evaluate"]).unwrap();
        assert_eq!(options.compile_options(), CompileOptions::reference());
    }

    #[test]
    fn unknown_arch_is_rejected() {
        assert!(EvaluateOptions::from_iter_safe(["evaluate", "--arch", "neon"]).is_err());
    }
}
