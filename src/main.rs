use anyhow::Result;
use clap::Parser;
use impair::cli::SubCommandExtend;
use impair::config::{Opts, SubCommand};

fn main() -> Result<()> {
    env_logger::init();

    let opts = Opts::parse();
    match &opts.subcmd {
        SubCommand::Exhaustive(cmd) => cmd.run(&opts),
        SubCommand::Sequential(cmd) => cmd.run(&opts),
        SubCommand::Spatial(cmd) => cmd.run(&opts),
        SubCommand::VocabTree(cmd) => cmd.run(&opts),
        SubCommand::Transitive(cmd) => cmd.run(&opts),
        SubCommand::Imported(cmd) => cmd.run(&opts),
    }
}
