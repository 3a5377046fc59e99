use clap::Args;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use neuroevo::network::{snapshot, Network};

use super::fail;

/// (inputs, target) with 0.01 standing in for 0.
const XOR_TABLE: [([f32; 2], f32); 4] = [
    ([1.0, 1.0], 0.01),
    ([0.01, 0.01], 0.01),
    ([1.0, 0.01], 1.0),
    ([0.01, 1.0], 1.0),
];

#[derive(Args)]
pub struct XorArgs {
    /// Passes over the four training rows
    #[arg(short, long, default_value = "200000")]
    pub iterations: u64,
    /// Seed for the initial weights
    #[arg(long, default_value = "1")]
    pub seed: u64,
    #[arg(long, default_value = "0.1")]
    pub learning_rate: f32,
    /// Save the trained network (.bin for binary, JSON otherwise)
    #[arg(long, value_name = "PATH")]
    pub save: Option<std::path::PathBuf>,
}

pub fn cmd_xor(args: XorArgs) {
    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);
    let mut network = Network::new(args.learning_rate, &[2, 3, 3, 1], &mut rng).unwrap_or_else(|e| fail(e));

    let start = std::time::Instant::now();
    let report_every = (args.iterations / 10).max(1);
    for i in 1..=args.iterations {
        for (input, target) in &XOR_TABLE {
            network.train(input, &[*target]).unwrap_or_else(|e| fail(e));
        }
        if i % report_every == 0 {
            eprintln!("  pass {:>8}  error {:.6}", i, total_error(&network));
        }
    }

    let mut correct = 0;
    for (input, target) in &XOR_TABLE {
        let out = network.query(input).unwrap_or_else(|e| fail(e))[0];
        let ok = round1(out) == round1(*target);
        if ok {
            correct += 1;
        }
        println!(
            "{:.2} xor {:.2} -> {:.4} (target {:.2}) {}",
            input[0],
            input[1],
            out,
            target,
            if ok { "ok" } else { "MISS" }
        );
    }
    eprintln!(
        "{}/4 rows correct after {} passes ({:.1}s)",
        correct,
        args.iterations,
        start.elapsed().as_secs_f64()
    );

    if let Some(path) = args.save {
        snapshot::save(&network, &path).unwrap_or_else(|e| fail(e));
        eprintln!("saved {}", path.display());
    }
    if correct != XOR_TABLE.len() {
        std::process::exit(1);
    }
}

fn total_error(network: &Network) -> f32 {
    XOR_TABLE
        .iter()
        .map(|(input, target)| {
            let out = network.query(input).map_or(f32::NAN, |o| o[0]);
            (target - out).powi(2)
        })
        .sum()
}

fn round1(x: f32) -> f32 {
    (x * 10.0).round() / 10.0
}
