use anyhow::Context;
use qnet::{run_comparison, NativeCompiler};
use structopt::StructOpt;

#[derive(StructOpt, Debug, PartialEq)]
#[structopt(about = "Compare normal net with quantised.")]
pub struct CompareOptions {
    /// Path to the image database, the images are read from `<path>.x`.
    #[structopt(short = "b", long = "database-path", default_value = "img.db")]
    pub database_path: String,
    /// Path to the model.
    #[structopt(short = "m", long = "model-path", default_value = "model.h5")]
    pub model_path: String,
}

impl CompareOptions {
    pub fn run(&self) -> anyhow::Result<()> {
        let comparison = run_comparison(&mut NativeCompiler, &self.database_path, &self.model_path)
            .with_context(|| format!("Failed to compare `{}` on `{}`.", self.model_path, self.database_path))?;

        if let Some(comparison) = comparison {
            println!("{comparison}");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CompareOptions {
        CompareOptions::from_iter_safe(std::iter::once("eval-quantisation").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn defaults() {
        let options = parse(&[]);
        assert_eq!(options.database_path, qnet::DEFAULT_DATABASE_PATH);
        assert_eq!(options.model_path, qnet::DEFAULT_MODEL_PATH);
    }

    #[test]
    fn explicit_paths_are_kept() {
        let options = parse(&["-b", "custom.db", "-m", "custom.h5"]);
        assert_eq!(options.database_path, "custom.db");
        assert_eq!(options.model_path, "custom.h5");

        let options = parse(&["--model-path", "nets/ball.h5"]);
        assert_eq!(options.database_path, "img.db");
        assert_eq!(options.model_path, "nets/ball.h5");

        let options = parse(&["--database-path=data/img.db"]);
        assert_eq!(options.database_path, "data/img.db");
        assert_eq!(options.model_path, "model.h5");
    }

    #[test]
    fn missing_database_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let options = CompareOptions {
            database_path: dir.path().join("img.db").to_string_lossy().into_owned(),
            model_path: dir.path().join("model.h5").to_string_lossy().into_owned(),
        };

        let err = options.run().unwrap_err();
        assert!(err.to_string().starts_with("Failed to compare"));
    }
}
