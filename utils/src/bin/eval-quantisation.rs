use qnet_utils::{compare::CompareOptions, init_logging};
use structopt::StructOpt;

#[derive(StructOpt)]
#[structopt(name = "eval-quantisation", about = "Compare normal net with quantised.")]
struct Cli {
    #[structopt(flatten)]
    options: CompareOptions,
    /// Log at debug level.
    #[structopt(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::from_args();
    init_logging(cli.verbose);
    cli.options.run()
}
