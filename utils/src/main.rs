use qnet_utils::{compare, evaluate, init, init_logging, quantise};
use structopt::StructOpt;

#[derive(StructOpt)]
pub enum Options {
    Compare(compare::CompareOptions),
    Evaluate(evaluate::EvaluateOptions),
    Quantise(quantise::QuantiseOptions),
    Init(init::InitOptions),
}

#[derive(StructOpt)]
struct Cli {
    /// Log at debug level.
    #[structopt(short, long, global = true)]
    verbose: bool,
    #[structopt(subcommand)]
    options: Options,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::from_args();
    init_logging(cli.verbose);

    match cli.options {
        Options::Compare(options) => options.run(),
        Options::Evaluate(options) => options.run(),
        Options::Quantise(options) => options.run(),
        Options::Init(options) => options.run(),
    }
}
