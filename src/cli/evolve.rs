use std::io::Write;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use tracing::info;

use neuroevo::config::{self, RunConfig};
use neuroevo::evolve::render::{BestSnapshot, RenderWorker};
use neuroevo::evolve::tracker::{ConvergenceTracker, RunMeta, RunStatus};
use neuroevo::evolve::{CancelToken, EvolutionController};
use neuroevo::matrix::{DotKernel, KernelSet, DEFAULT_OFFLOAD_THRESHOLD};
use neuroevo::network::{snapshot, Network};
use neuroevo::snake::SnakeEvaluator;

use super::fail;

#[derive(Args)]
pub struct EvolveArgs {
    /// JSON run configuration (default: the reference run)
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,
    /// Generations to run
    #[arg(short, long, default_value = "100")]
    pub generations: u64,
    /// Elites kept per generation
    #[arg(long)]
    pub elites: Option<usize>,
    /// Mutated offspring per elite
    #[arg(long)]
    pub offspring: Option<usize>,
    /// Fresh random networks per generation
    #[arg(long)]
    pub immigrants: Option<usize>,
    #[arg(long)]
    pub seed: Option<u64>,
    /// Seed for food placement in every episode
    #[arg(long)]
    pub food_seed: Option<u64>,
    /// Evaluation threads (0: one per CPU)
    #[arg(short, long)]
    pub workers: Option<usize>,
    /// Offload large dot products to the GPU when one is available
    #[arg(long)]
    pub gpu: bool,
    /// Replay the best game every N generations (0: never)
    #[arg(long, default_value = "1")]
    pub render_every: u64,
    /// Delay between rendered frames
    #[arg(long, default_value = "20")]
    pub frame_delay_ms: u64,
    /// Save the best network seen (.bin for binary, JSON otherwise)
    #[arg(long, value_name = "PATH")]
    pub save: Option<PathBuf>,
    /// Save run metadata (generation, score, weight hash) as JSON
    #[arg(long, value_name = "PATH")]
    pub meta: Option<PathBuf>,
    /// Stop early once the best score has converged
    #[arg(long)]
    pub stop_on_converge: bool,
}

fn resolve_config(args: &EvolveArgs) -> RunConfig {
    let mut run = match &args.config {
        Some(path) => config::load(path).unwrap_or_else(|e| fail(e)),
        None => RunConfig::default(),
    };
    let evo = &mut run.evolution;
    let mut reshaped = false;
    if let Some(n) = args.elites {
        evo.elite_count = n;
        reshaped = true;
    }
    if let Some(n) = args.offspring {
        evo.offspring_per_elite = n;
        reshaped = true;
    }
    if let Some(n) = args.immigrants {
        evo.random_immigrant_count = n;
        reshaped = true;
    }
    if reshaped {
        evo.rebalance();
    }
    if let Some(seed) = args.seed {
        evo.seed = seed;
    }
    if let Some(workers) = args.workers {
        evo.workers = workers;
    }
    if let Some(seed) = args.food_seed {
        run.snake.food_seed = seed;
    }
    run
}

fn spawn_renderer(evaluator: SnakeEvaluator, kernel: Arc<dyn DotKernel>, delay: Duration) -> RenderWorker {
    RenderWorker::spawn(move |best: BestSnapshot| {
        let frames = match evaluator.replay(&best.network, kernel.as_ref()) {
            Ok((_, frames)) => frames,
            Err(e) => {
                eprintln!("render: {}", e);
                return;
            }
        };
        let stdout = std::io::stdout();
        // Clear once, then redraw each frame in place.
        let _ = write!(stdout.lock(), "\x1b[2J");
        for frame in frames {
            let mut out = stdout.lock();
            let _ = write!(
                out,
                "\x1b[H{}\ngeneration - {}\nbestScore - {}\n",
                frame, best.generation, best.best_ever
            );
            let _ = out.flush();
            drop(out);
            std::thread::sleep(delay);
        }
    })
    .unwrap_or_else(|e| fail(e))
}

pub fn cmd_evolve(args: EvolveArgs) {
    let run = resolve_config(&args);
    let evaluator = SnakeEvaluator::new(run.snake.clone()).unwrap_or_else(|e| fail(e));

    let kernel_set = if args.gpu {
        KernelSet::probe(DEFAULT_OFFLOAD_THRESHOLD)
    } else {
        KernelSet::cpu()
    };
    if args.gpu && !kernel_set.is_accelerated() {
        eprintln!("warning: no usable GPU, evaluating on the CPU");
    }
    let kernel: Arc<dyn DotKernel> = Arc::new(kernel_set);

    eprintln!(
        "Evolving {} networks ({} elites x (1 + {}) + {} immigrants), topology {:?}, {} generations",
        run.evolution.population_size,
        run.evolution.elite_count,
        run.evolution.offspring_per_elite,
        run.evolution.random_immigrant_count,
        run.evolution.topology,
        args.generations,
    );

    let mut controller = EvolutionController::new(run.evolution.clone(), evaluator.clone(), Arc::clone(&kernel))
        .unwrap_or_else(|e| fail(e));

    let mut renderer = (args.render_every > 0)
        .then(|| spawn_renderer(evaluator, Arc::clone(&kernel), Duration::from_millis(args.frame_delay_ms)));

    let mut tracker = ConvergenceTracker::default();
    let mut best: Option<(f64, Network)> = None;
    let mut prev_score = 0.0;
    let mut last_score = 0.0;
    let cancel = CancelToken::new();
    let start = std::time::Instant::now();

    if args.generations > 0 {
        let target = args.generations;
        let result = controller.run(&cancel, |report| {
            eprintln!(
                "gen {:>5}  best {:>4}  mean {:>8.3}  best ever {:>4}  ({:.2}s)",
                report.generation,
                report.best.score,
                report.mean_score,
                report.best_ever,
                report.elapsed.as_secs_f64(),
            );
            prev_score = last_score;
            last_score = report.best.score;
            if best.as_ref().map_or(true, |(score, _)| report.best.score > *score) {
                best = Some((report.best.score, report.best.network.clone()));
            }
            let status = tracker.record(report.best.score);

            if let Some(worker) = renderer.as_mut() {
                if report.generation % args.render_every == 0 {
                    worker.submit(BestSnapshot {
                        generation: report.generation,
                        score: report.best.score,
                        best_ever: report.best_ever,
                        network: report.best.network.clone(),
                    });
                }
            }

            if args.stop_on_converge && status == RunStatus::Converged {
                eprintln!("converged at generation {}", report.generation);
                return ControlFlow::Break(());
            }
            if report.generation + 1 >= target {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        if let Err(e) = result {
            if let Some(worker) = renderer.take() {
                worker.finish();
            }
            fail(e);
        }
    }

    if let Some(worker) = renderer.take() {
        let dropped = worker.dropped();
        worker.finish();
        info!(dropped, "render worker stopped");
    }

    eprintln!();
    eprintln!(
        "Done: {} generations, best score {} ({:.1}s)",
        controller.generation(),
        controller.best_ever().unwrap_or(0.0),
        start.elapsed().as_secs_f64(),
    );

    let Some((best_score, network)) = best else {
        return;
    };
    let weight_hash = snapshot::hash_weights(&network);
    if let Some(path) = &args.save {
        snapshot::save(&network, path).unwrap_or_else(|e| fail(e));
        info!(path = %path.display(), hash = %weight_hash, "best network saved");
        eprintln!("  saved {} (hash {})", path.display(), weight_hash);
    }
    if let Some(path) = &args.meta {
        let meta = RunMeta {
            generation: controller.generation(),
            weight_hash,
            best_score,
            prev_score,
            status: tracker.status(),
        };
        meta.save(path).unwrap_or_else(|e| fail(e));
        eprintln!("  model: gen {}, score {}, status: {}", meta.generation, meta.best_score, meta.status);
    }
}
