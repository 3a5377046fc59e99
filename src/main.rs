use clap::{Parser, Subcommand};

mod cli;

#[derive(Parser)]
#[command(
    name = "neuroevo",
    version,
    about = "Feedforward networks trained by backpropagation or evolved by elitist selection"
)]
struct Cli {
    /// Default log filter when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Evolve snake-playing networks
    Evolve(cli::evolve::EvolveArgs),
    /// Train a classifier on a labelled CSV dataset and report accuracy
    Train(cli::train::TrainArgs),
    /// Train a 2-3-3-1 network on XOR by backpropagation
    Xor(cli::xor::XorArgs),
    /// Show a saved network and optionally query it
    Inspect(cli::inspect::InspectArgs),
}

fn main() {
    let cli = Cli::parse();
    neuroevo::logging::init(&cli.log);

    match cli.command {
        Command::Evolve(args) => cli::evolve::cmd_evolve(args),
        Command::Train(args) => cli::train::cmd_train(args),
        Command::Xor(args) => cli::xor::cmd_xor(args),
        Command::Inspect(args) => cli::inspect::cmd_inspect(args),
    }
}
