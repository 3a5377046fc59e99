use std::path::PathBuf;

use clap::Args;

use neuroevo::network::snapshot;

use super::fail;

#[derive(Args)]
pub struct InspectArgs {
    /// Saved network (.bin or JSON)
    pub path: PathBuf,
    /// Comma-separated input vector to query the network with
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    pub input: Option<Vec<f32>>,
}

pub fn cmd_inspect(args: InspectArgs) {
    let network = snapshot::load(&args.path).unwrap_or_else(|e| fail(e));

    let topology: Vec<String> = network.topology().iter().map(|n| n.to_string()).collect();
    println!("topology:      {}", topology.join("-"));
    println!("learning rate: {}", network.learning_rate());
    println!("weights:       {}", network.weight_count());
    println!("hash:          {}", snapshot::hash_weights(&network));

    if let Some(input) = args.input {
        let output = network.query(&input).unwrap_or_else(|e| fail(e));
        let cells: Vec<String> = output.iter().map(|v| format!("{:.6}", v)).collect();
        println!("output:        [{}]", cells.join(", "));
    }
}
