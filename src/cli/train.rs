use std::path::PathBuf;
use std::process;

use clap::Args;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::info;

use neuroevo::matrix::{DotKernel, KernelSet, DEFAULT_OFFLOAD_THRESHOLD};
use neuroevo::network::dataset::{CsvFormat, Dataset};
use neuroevo::network::{snapshot, Network};

use super::fail;

#[derive(Args)]
pub struct TrainArgs {
    /// Training CSV, one `label,x1,x2,...` row per sample
    pub data: PathBuf,
    /// Held-out CSV to score (default: the training file)
    #[arg(short, long, value_name = "PATH")]
    pub test: Option<PathBuf>,
    /// Passes over the training rows
    #[arg(short, long, default_value = "1")]
    pub epochs: u32,
    /// Hidden layer sizes, comma-separated
    #[arg(long, value_delimiter = ',', default_value = "100")]
    pub hidden: Vec<usize>,
    /// Number of label classes (output neurons)
    #[arg(long, default_value = "10")]
    pub classes: usize,
    /// Largest raw feature value, used to scale inputs into [0.01, 1.0]
    #[arg(long, default_value = "255")]
    pub input_max: f32,
    #[arg(long, default_value = "0.1")]
    pub learning_rate: f32,
    /// Seed for the initial weights
    #[arg(long, default_value = "1")]
    pub seed: u64,
    /// Start from a saved network instead of a random one
    #[arg(long, value_name = "PATH")]
    pub resume: Option<PathBuf>,
    /// Offload large dot products to the GPU when one is available
    #[arg(long)]
    pub gpu: bool,
    /// Save the trained network (.bin for binary, JSON otherwise)
    #[arg(long, value_name = "PATH")]
    pub save: Option<PathBuf>,
    /// Exit with status 1 when test accuracy ends below this fraction
    #[arg(long)]
    pub min_accuracy: Option<f64>,
}

pub fn cmd_train(args: TrainArgs) {
    let format = CsvFormat {
        classes: args.classes,
        input_max: args.input_max,
    };
    let train = Dataset::load(&args.data, format).unwrap_or_else(|e| fail(e));
    let test = match &args.test {
        Some(path) => Dataset::load(path, format).unwrap_or_else(|e| fail(e)),
        None => train.clone(),
    };

    let mut network = match &args.resume {
        Some(path) => snapshot::load(path).unwrap_or_else(|e| fail(e)),
        None => {
            let mut topology = vec![train.width()];
            topology.extend(&args.hidden);
            topology.push(args.classes);
            Network::new(args.learning_rate, &topology, &mut ChaCha8Rng::seed_from_u64(args.seed))
                .unwrap_or_else(|e| fail(e))
        }
    };

    let kernel_set = if args.gpu {
        KernelSet::probe(DEFAULT_OFFLOAD_THRESHOLD)
    } else {
        KernelSet::cpu()
    };
    if args.gpu && !kernel_set.is_accelerated() {
        eprintln!("warning: no usable GPU, training on the CPU");
    }
    let kernel: &dyn DotKernel = &kernel_set;

    eprintln!(
        "Training {:?} on {} rows ({} held out), {} epoch(s)",
        network.topology(),
        train.len(),
        test.len(),
        args.epochs,
    );
    if let Some(path) = &args.resume {
        eprintln!("  resuming from {}", path.display());
    }
    eprintln!();

    let start = std::time::Instant::now();
    for epoch in 1..=args.epochs {
        let epoch_start = std::time::Instant::now();
        train.train_epoch(&mut network, kernel).unwrap_or_else(|e| fail(e));
        let accuracy = test.accuracy(&network, kernel).unwrap_or_else(|e| fail(e));
        eprintln!(
            "[{}/{}] accuracy {:.2}% ({:.1}s)",
            epoch,
            args.epochs,
            accuracy * 100.0,
            epoch_start.elapsed().as_secs_f64(),
        );
        info!(epoch, accuracy, "epoch complete");
    }

    let correct = test.correct(&network, kernel).unwrap_or_else(|e| fail(e));
    let accuracy = correct as f64 / test.len() as f64;
    eprintln!();
    eprintln!(
        "Done: {}/{} correct ({:.2}%), {} epoch(s) ({:.1}s)",
        correct,
        test.len(),
        accuracy * 100.0,
        args.epochs,
        start.elapsed().as_secs_f64(),
    );

    if let Some(path) = &args.save {
        snapshot::save(&network, path).unwrap_or_else(|e| fail(e));
        eprintln!("  saved {} (hash {})", path.display(), snapshot::hash_weights(&network));
    }
    if let Some(min) = args.min_accuracy {
        if accuracy < min {
            eprintln!("error: accuracy {:.4} is below the required {:.4}", accuracy, min);
            process::exit(1);
        }
    }
}
