use std::path::PathBuf;

use anyhow::Context;
use qnet::{network::ball_detector, Shape};
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(about = "Write a freshly initialised ball detector.")]
pub struct InitOptions {
    #[structopt(required = true, short, long)]
    output: PathBuf,
    #[structopt(long, default_value = "32")]
    height: usize,
    #[structopt(long, default_value = "32")]
    width: usize,
    #[structopt(long, default_value = "1")]
    channels: usize,
    #[structopt(long, default_value = "0")]
    seed: u64,
}

impl InitOptions {
    pub fn run(&self) -> anyhow::Result<()> {
        let input = Shape::Image { height: self.height, width: self.width, channels: self.channels };
        let network = ball_detector(input, self.seed).with_context(|| format!("Cannot build a network for {input}."))?;

        network.save(&self.output).with_context(|| format!("Failed to write `{}`.", self.output.display()))?;

        println!("> Wrote {input} -> {} network to {}", network.output_shape(), self.output.display());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qnet::Network;

    #[test]
    fn written_network_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("model.h5");

        InitOptions::from_iter_safe(["init", "-o", output.to_str().unwrap(), "--height", "16", "--width", "12"])
            .unwrap()
            .run()
            .unwrap();

        let network = Network::load(&output).unwrap();
        assert_eq!(network.input_shape(), Shape::Image { height: 16, width: 12, channels: 1 });
        assert_eq!(network.output_shape(), Shape::Vector(1));
    }

    #[test]
    fn tiny_inputs_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let options = InitOptions { output: dir.path().join("model.h5"), height: 4, width: 4, channels: 1, seed: 0 };
        assert!(options.run().is_err());
    }
}
