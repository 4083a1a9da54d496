use std::{path::PathBuf, time::Instant};

use anyhow::Context;
use qnet::{Compiled, Network};
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(about = "Quantise a model and write its 8-bit parameters.")]
pub struct QuantiseOptions {
    #[structopt(required = true, short, long)]
    model: PathBuf,
    #[structopt(required = true, short, long)]
    output: PathBuf,
}

impl QuantiseOptions {
    pub fn run(&self) -> anyhow::Result<()> {
        let timer = Instant::now();

        let network =
            Network::load(&self.model).with_context(|| format!("Failed to load `{}`.", self.model.display()))?;
        let compiled = Compiled::new(network, true).with_context(|| "Failed to quantise network.")?;

        compiled.export(&self.output).with_context(|| format!("Failed to write `{}`.", self.output.display()))?;

        println!("> Quantised {} in {:.2} seconds.", self.model.display(), timer.elapsed().as_secs_f32());

        Ok(())
    }
}
