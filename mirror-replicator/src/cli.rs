use clap::{Args, CommandFactory, Parser, Subcommand};

/// Anonymizing mirror of a customer table.
#[derive(Debug, Parser)]
#[command(name = "mirror-replicator", version, args_conflicts_with_subcommands = true)]
pub struct Cli {
    /// Runs the catch-up sync instead of the continuous mirror.
    #[arg(long)]
    full_reindex: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Follows new source inserts until terminated. This is the default.
    Continuous,
    /// Reconciles the sink with every source record once, then exits.
    CatchUp,
    /// Inserts synthetic customers into the source table until terminated.
    Generate(GenerateArgs),
}

/// Settings of the load generator.
#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct GenerateArgs {
    /// Delay between two inserted batches.
    #[arg(long, default_value_t = 200, value_parser = clap::value_parser!(u64).range(1..))]
    pub interval_ms: u64,
    /// Smallest number of customers inserted at once.
    #[arg(long, default_value_t = 1)]
    pub min_batch: usize,
    /// Largest number of customers inserted at once.
    #[arg(long, default_value_t = 10)]
    pub max_batch: usize,
}

/// Operating mode selected on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Continuous,
    CatchUp,
    Generate(GenerateArgs),
}

impl Cli {
    /// Resolves the operating mode, rejecting inconsistent generator bounds.
    pub fn mode(self) -> Result<Mode, clap::Error> {
        let mode = match self.command {
            None if self.full_reindex => Mode::CatchUp,
            None | Some(Command::Continuous) => Mode::Continuous,
            Some(Command::CatchUp) => Mode::CatchUp,
            Some(Command::Generate(args)) => {
                if args.min_batch == 0 || args.min_batch > args.max_batch {
                    return Err(Cli::command().error(
                        clap::error::ErrorKind::ValueValidation,
                        "`--min-batch` must be at least 1 and at most `--max-batch`",
                    ));
                }

                Mode::Generate(args)
            }
        };

        Ok(mode)
    }
}
