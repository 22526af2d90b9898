// =============================================================================
// Federated MNIST — fedsim round simulator
// =============================================================================
//
// Runs the full federated protocol: partition MNIST across clients (IID or
// non-IID), then repeat broadcast → local training → aggregation →
// evaluation until the target accuracy is reached, quantizing every
// parameter transfer and accounting for the bits saved.
//
// Usage:
//   cargo run -p federated-mnist                        # synthetic data
//   cargo run -p federated-mnist -- --data-dir ./data   # real MNIST IDX files
//   cargo run -p federated-mnist -- --clients 5 --non-iid --scheme int8
//
// The MNIST directory may also be set through FEDSIM_DATA_DIR.

use fedsim::prelude::*;
use fedsim::{DatasetKind, QuantScheme};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

struct Config {
    data_dir: Option<String>,
    clients: usize,
    non_iid: bool,
    mix: f32,
    validation: f32,
    scheme: QuantScheme,
    target: f64,
    rounds: usize,
    epochs: usize,
    batch_size: usize,
    lr: f32,
    seed: u64,
    full: bool,
    parallel: bool,
    save_model: Option<String>,
    save_state: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            clients: 5,
            non_iid: false,
            mix: 0.0,
            validation: 0.0,
            scheme: QuantScheme::AffineInt8,
            target: 0.9,
            rounds: 30,
            epochs: 1,
            batch_size: 25,
            lr: 0.05,
            seed: 42,
            full: false,
            parallel: false,
            save_model: None,
            save_state: None,
        }
    }
}

fn parse_args() -> Config {
    let mut cfg = Config::default();
    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--data-dir" => {
                i += 1;
                cfg.data_dir = Some(args[i].clone());
            }
            "--clients" => {
                i += 1;
                cfg.clients = args[i].parse().expect("invalid --clients");
            }
            "--non-iid" => cfg.non_iid = true,
            "--mix" => {
                i += 1;
                cfg.mix = args[i].parse().expect("invalid --mix");
                cfg.non_iid = true;
            }
            "--val" => {
                i += 1;
                cfg.validation = args[i].parse().expect("invalid --val");
            }
            "--scheme" => {
                i += 1;
                cfg.scheme = match args[i].as_str() {
                    "none" => QuantScheme::None,
                    "half" => QuantScheme::HalfFloat,
                    "int8" => QuantScheme::AffineInt8,
                    other => {
                        eprintln!("Unknown scheme: {other} (expected none|half|int8)");
                        std::process::exit(1);
                    }
                };
            }
            "--target" => {
                i += 1;
                cfg.target = args[i].parse().expect("invalid --target");
            }
            "--rounds" => {
                i += 1;
                cfg.rounds = args[i].parse().expect("invalid --rounds");
            }
            "--epochs" => {
                i += 1;
                cfg.epochs = args[i].parse().expect("invalid --epochs");
            }
            "--batch-size" => {
                i += 1;
                cfg.batch_size = args[i].parse().expect("invalid --batch-size");
            }
            "--lr" => {
                i += 1;
                cfg.lr = args[i].parse().expect("invalid --lr");
            }
            "--seed" => {
                i += 1;
                cfg.seed = args[i].parse().expect("invalid --seed");
            }
            "--full" => cfg.full = true,
            "--parallel" => cfg.parallel = true,
            "--save-model" => {
                i += 1;
                cfg.save_model = Some(args[i].clone());
            }
            "--save-state" => {
                i += 1;
                cfg.save_state = Some(args[i].clone());
            }
            "--help" | "-h" => {
                println!("Federated MNIST experiment");
                println!();
                println!("Options:");
                println!("  --data-dir <path>    MNIST root (contains mnist/ with IDX files)");
                println!("  --clients <n>        Number of clients (default: 5)");
                println!("  --non-iid            Disjoint label ranges per client");
                println!("  --mix <f>            IID admixture fraction for non-IID (implies --non-iid)");
                println!("  --val <f>            Validation fraction carved out first");
                println!("  --scheme <s>         none | half | int8 (default: int8)");
                println!("  --target <f>         Target test accuracy fraction (default: 0.9)");
                println!("  --rounds <n>         Round budget (default: 30)");
                println!("  --epochs <n>         Local epochs per client per round (default: 1)");
                println!("  --batch-size <n>     Mini-batch size (default: 25)");
                println!("  --lr <f>             Learning rate (default: 0.05)");
                println!("  --seed <n>           Partition/init seed (default: 42)");
                println!("  --full               Use the full dataset (default: first 5000)");
                println!("  --parallel           Train clients in parallel within a round");
                println!("  --save-model <path>  Write the final coordinator model");
                println!("  --save-state <path>  Write the experiment record as JSON");
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                std::process::exit(1);
            }
        }
        i += 1;
    }
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

fn main() -> fedsim::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cfg = parse_args();

    println!("=== fedsim — Federated MNIST ===");
    println!();

    // ─────────────────────────────────────────────────────────────────────
    // 1. Load dataset
    // ─────────────────────────────────────────────────────────────────────
    if let Some(ref dir) = cfg.data_dir {
        std::env::set_var(fedsim::DATA_DIR_ENV, dir);
    }
    let (train, test) = match fedsim::load_dataset(DatasetKind::Mnist, !cfg.full) {
        Ok(pair) => {
            println!("Loaded MNIST ({} train / {} test samples)", pair.0.len(), pair.1.len());
            pair
        }
        Err(e) => {
            println!("MNIST unavailable ({e}); using synthetic clusters");
            println!("  Tip: pass --data-dir or set FEDSIM_DATA_DIR");
            (
                LabeledDataset::synthetic(5000, 784, 10, cfg.seed),
                LabeledDataset::synthetic(1000, 784, 10, cfg.seed + 1),
            )
        }
    };
    println!();

    // ─────────────────────────────────────────────────────────────────────
    // 2. Partition across clients
    // ─────────────────────────────────────────────────────────────────────
    let mode = if cfg.non_iid {
        SplitMode::NonIid {
            iid_fraction: cfg.mix,
        }
    } else {
        SplitMode::Iid
    };
    let partition_config = PartitionConfig {
        num_clients: cfg.clients,
        mode,
        validation_fraction: cfg.validation,
        seed: cfg.seed,
    };

    println!("Partition: {} clients, {:?}", cfg.clients, mode);
    if cfg.validation > 0.0 {
        println!("  Validation carve-out: {:.0}%", cfg.validation * 100.0);
    }
    println!("Scheme: {} | target {:.1}% | budget {} rounds", cfg.scheme.name(), cfg.target * 100.0, cfg.rounds);
    println!();

    // ─────────────────────────────────────────────────────────────────────
    // 3. Build the federation
    // ─────────────────────────────────────────────────────────────────────
    let model = DenseClassifier::new(train.feature_dim(), 128, train.num_classes());
    let initial = model.init_params(cfg.seed);
    println!(
        "Model: Dense({} → 128 → {}), {} parameters",
        train.feature_dim(),
        train.num_classes(),
        initial.num_values()
    );
    println!();

    let opts = LocalOpts::default()
        .epochs(cfg.epochs)
        .batch_size(cfg.batch_size)
        .learning_rate(cfg.lr)
        .seed(cfg.seed);
    let client_opts = vec![opts; cfg.clients];

    let round_config = RoundConfig::default()
        .target_accuracy(cfg.target)
        .max_rounds(cfg.rounds)
        .scheme(cfg.scheme)
        .parallel_clients(cfg.parallel);

    let mut federation = Federation::new(
        &train,
        &test,
        &partition_config,
        initial,
        &client_opts,
        model,
        model,
        round_config,
    )?;

    // ─────────────────────────────────────────────────────────────────────
    // 4. Run the round loop
    // ─────────────────────────────────────────────────────────────────────
    println!("Running...");
    println!("{:-<60}", "");
    let summary = federation.run()?;
    let state = federation.state();

    for (round, acc) in state.test_accuracies.iter().enumerate() {
        print!("  Round {:>3} | Test Acc: {:>5.1}%", round + 1, acc * 100.0);
        if round > 0 {
            let rec = &state.server_traffic[round - 1];
            print!(
                " | broadcast {} bits ({} conserved)",
                rec.transferred, rec.conserved
            );
        }
        println!();
    }
    println!("{:-<60}", "");
    println!();

    if summary.reached_target {
        println!(
            "Reached {:.1}% after {} rounds (final: {:.1}%)",
            cfg.target * 100.0,
            summary.rounds,
            summary.final_accuracy * 100.0
        );
    } else {
        println!(
            "Round budget exhausted at {:.1}% (target {:.1}%)",
            summary.final_accuracy * 100.0,
            cfg.target * 100.0
        );
    }

    // ─────────────────────────────────────────────────────────────────────
    // 5. Persist results
    // ─────────────────────────────────────────────────────────────────────
    if let Some(ref path) = cfg.save_model {
        let payload = Payload::Full(federation.coordinator_params().clone());
        fedsim::save_payload(path, &payload)?;
        println!("Saved coordinator model to: {path}");
    }
    if let Some(ref path) = cfg.save_state {
        state.save_json(path)?;
        println!("Saved experiment state to: {path}");
    }

    println!();
    println!("=== Done ===");
    Ok(())
}
