// Round orchestration — the federated communication-round state machine
//
// One round is BROADCAST → LOCAL_TRAIN → AGGREGATE → EVALUATE:
//
//   BROADCAST   coordinator model is measured, encoded, measured again,
//               decoded, and installed into every client (skipped in
//               round 1 — clients start from the initial model)
//   LOCAL_TRAIN every client runs its configured number of local epochs
//               against its own shard
//   AGGREGATE   client models are measured, encoded, measured, decoded,
//               and averaged into the new coordinator model
//   EVALUATE    the coordinator model is scored on the held-out test set
//
// The loop repeats until the target accuracy is reached or the round
// budget expires. All bit accounting goes through the wire representation
// of the actual transfer payloads. Clients only ever train on decoded,
// full-precision copies; quantization exists on the wire alone.

use std::fs;
use std::path::Path;

use rayon::prelude::*;
use serde::Serialize;

use fedsim_core::{bail, ParamMap, Result};
use fedsim_data::{partition, LabeledDataset, PartitionConfig, Shard, ShardView};
use fedsim_quant::{model_size_in_bits, payload_size_in_bits, QuantScheme};

use crate::aggregate::average_models;

// Collaborator interfaces

/// Loss and accuracy from one training or evaluation pass.
///
/// Accuracy is a fraction in `[0, 1]`.
#[derive(Debug, Clone, Copy)]
pub struct StepMetrics {
    pub loss: f64,
    pub accuracy: f64,
}

/// The external local-training collaborator.
///
/// `train` mutates the parameter mapping in place via gradient-based
/// optimization over the shard's samples; the orchestrator does not
/// inspect its internals.
pub trait LocalTrainer: Sync {
    fn train(&self, params: &mut ParamMap, data: ShardView<'_>, opts: &LocalOpts)
        -> Result<StepMetrics>;
}

/// The external evaluation collaborator; read-only on the mapping.
pub trait Evaluator: Sync {
    fn evaluate(&self, params: &ParamMap, data: ShardView<'_>) -> Result<StepMetrics>;
}

// Configuration

/// Per-client local-training hyperparameters.
#[derive(Debug, Clone, Copy)]
pub struct LocalOpts {
    /// Local epochs per round.
    pub epochs: usize,
    /// Mini-batch size.
    pub batch_size: usize,
    /// SGD learning rate.
    pub learning_rate: f32,
    /// Seed for the client's epoch shuffles.
    pub seed: u64,
}

impl Default for LocalOpts {
    fn default() -> Self {
        Self {
            epochs: 5,
            batch_size: 50,
            learning_rate: 0.001,
            seed: 42,
        }
    }
}

impl LocalOpts {
    pub fn epochs(mut self, e: usize) -> Self {
        self.epochs = e;
        self
    }

    pub fn batch_size(mut self, b: usize) -> Self {
        self.batch_size = b;
        self
    }

    pub fn learning_rate(mut self, lr: f32) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn seed(mut self, s: u64) -> Self {
        self.seed = s;
        self
    }
}

/// Immutable round-loop configuration, passed in at construction time.
#[derive(Debug, Clone)]
pub struct RoundConfig {
    /// Stop once test accuracy reaches this fraction.
    pub target_accuracy: f64,
    /// Hard bound on the number of rounds, so an unreachable target
    /// cannot run the loop unbounded.
    pub max_rounds: usize,
    /// Wire encoding for both transfer directions.
    pub scheme: QuantScheme,
    /// Train clients in parallel within a round. Every client still works
    /// from the same broadcast snapshot, and aggregation waits for all of
    /// them, so the protocol is unchanged.
    pub parallel_clients: bool,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            target_accuracy: 0.9,
            max_rounds: 50,
            scheme: QuantScheme::None,
            parallel_clients: false,
        }
    }
}

impl RoundConfig {
    pub fn target_accuracy(mut self, a: f64) -> Self {
        self.target_accuracy = a;
        self
    }

    pub fn max_rounds(mut self, r: usize) -> Self {
        self.max_rounds = r;
        self
    }

    pub fn scheme(mut self, s: QuantScheme) -> Self {
        self.scheme = s;
        self
    }

    pub fn parallel_clients(mut self, p: bool) -> Self {
        self.parallel_clients = p;
        self
    }
}

// Participants

/// One federated client: a data shard, a local model, and hyperparameters.
///
/// The parameter mapping is overwritten by the decoded broadcast at the
/// start of every round after the first, and mutated in place by local
/// training. No one else writes it.
#[derive(Debug, Clone)]
pub struct Client {
    pub id: usize,
    pub shard: Shard,
    pub params: ParamMap,
    pub opts: LocalOpts,
}

/// The coordinator ("central server") and its authoritative model.
#[derive(Debug, Clone)]
pub struct Coordinator {
    pub params: ParamMap,
}

// Experiment record

/// Bit counts for one transfer direction in one round.
///
/// The client→server entries multiply per-client sizes together instead of
/// summing them — an aggregate magnitude rather than a bit total; `u128`
/// with saturation keeps the products representable.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct BitsRecord {
    pub original: u128,
    pub transferred: u128,
    pub conserved: u128,
}

/// Append-only record of a run; grows one entry per round per sequence.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExperimentState {
    /// Completed communication rounds.
    pub rounds: usize,
    /// Test accuracy after each round.
    pub test_accuracies: Vec<f64>,
    /// Server→client transfer accounting per round (round 1 has no
    /// broadcast, so this starts one entry behind).
    pub server_traffic: Vec<BitsRecord>,
    /// Client→server transfer accounting per round.
    pub client_traffic: Vec<BitsRecord>,
}

impl ExperimentState {
    /// Serialize the record as pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| fedsim_core::Error::msg(format!("experiment state to JSON: {e}")))
    }

    /// Persist the record to a JSON file.
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

/// Outcome of a full run.
#[derive(Debug, Clone, Copy)]
pub struct RunSummary {
    /// Whether the target accuracy was reached within the round budget.
    pub reached_target: bool,
    /// Rounds completed.
    pub rounds: usize,
    /// Last recorded test accuracy.
    pub final_accuracy: f64,
}

// The orchestrator

/// Drives the round loop over a fixed set of clients.
pub struct Federation<'a, T, E> {
    train_data: &'a LabeledDataset,
    test_data: &'a LabeledDataset,
    test_shard: Shard,
    validation: Option<Shard>,
    coordinator: Coordinator,
    clients: Vec<Client>,
    trainer: T,
    evaluator: E,
    config: RoundConfig,
    state: ExperimentState,
}

impl<'a, T, E> Federation<'a, T, E>
where
    T: LocalTrainer,
    E: Evaluator,
{
    /// Set up a federation: partition the training collection and build
    /// one client per shard, each starting from a clone of the initial
    /// coordinator model.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        train_data: &'a LabeledDataset,
        test_data: &'a LabeledDataset,
        partition_config: &PartitionConfig,
        initial: ParamMap,
        client_opts: &[LocalOpts],
        trainer: T,
        evaluator: E,
        config: RoundConfig,
    ) -> Result<Self> {
        let parts = partition(train_data, partition_config)?;
        Self::from_shards(
            train_data,
            test_data,
            parts.client_shards,
            parts.validation,
            initial,
            client_opts,
            trainer,
            evaluator,
            config,
        )
    }

    /// Set up a federation over pre-computed shards.
    #[allow(clippy::too_many_arguments)]
    pub fn from_shards(
        train_data: &'a LabeledDataset,
        test_data: &'a LabeledDataset,
        shards: Vec<Shard>,
        validation: Option<Shard>,
        initial: ParamMap,
        client_opts: &[LocalOpts],
        trainer: T,
        evaluator: E,
        config: RoundConfig,
    ) -> Result<Self> {
        if shards.len() != client_opts.len() {
            bail!(
                "{} shards but {} client option sets",
                shards.len(),
                client_opts.len()
            );
        }
        if initial.is_empty() {
            bail!("initial model has no parameters");
        }

        let clients = shards
            .into_iter()
            .zip(client_opts)
            .enumerate()
            .map(|(id, (shard, &opts))| Client {
                id,
                shard,
                params: initial.clone(),
                opts,
            })
            .collect();

        Ok(Self {
            test_shard: Shard::full(test_data.len()),
            validation,
            train_data,
            test_data,
            coordinator: Coordinator { params: initial },
            clients,
            trainer,
            evaluator,
            config,
            state: ExperimentState::default(),
        })
    }

    /// Run rounds until the target accuracy is reached or the budget
    /// expires.
    pub fn run(&mut self) -> Result<RunSummary> {
        while self.state.rounds < self.config.max_rounds {
            let round = self.state.rounds + 1;
            tracing::info!(round, "communication round");

            if round > 1 {
                self.broadcast(round)?;
            }
            self.local_training(round)?;
            self.aggregate(round)?;

            let metrics = self.evaluate()?;
            self.state.test_accuracies.push(metrics.accuracy);
            self.state.rounds = round;
            tracing::info!(
                round,
                accuracy = metrics.accuracy,
                loss = metrics.loss,
                "round complete"
            );

            if metrics.accuracy >= self.config.target_accuracy {
                return Ok(self.summary(true));
            }
        }

        tracing::warn!(
            rounds = self.state.rounds,
            target = self.config.target_accuracy,
            "round budget exhausted before reaching target accuracy"
        );
        Ok(self.summary(false))
    }

    /// Encode the coordinator model, account for the transfer, and install
    /// the decoded full-precision copy into every client.
    fn broadcast(&mut self, round: usize) -> Result<()> {
        let original = model_size_in_bits(&self.coordinator.params) as u128;
        let payload = self.config.scheme.encode(&self.coordinator.params).map_err(|e| {
            tracing::error!(round, error = %e, "server-side encode failed");
            e
        })?;
        let transferred = payload_size_in_bits(&payload) as u128;
        self.state.server_traffic.push(BitsRecord {
            original,
            transferred,
            conserved: original.saturating_sub(transferred),
        });

        let decoded = payload.decode()?;
        for client in &mut self.clients {
            client.params = decoded.clone();
        }
        Ok(())
    }

    /// Run every client's local epochs; a full barrier before aggregation.
    fn local_training(&mut self, round: usize) -> Result<()> {
        let trainer = &self.trainer;
        let train_data = self.train_data;

        let step = |client: &mut Client| -> Result<()> {
            let view = ShardView::new(train_data, &client.shard);
            let metrics = trainer.train(&mut client.params, view, &client.opts)?;
            tracing::debug!(
                round,
                client = client.id,
                loss = metrics.loss,
                accuracy = metrics.accuracy,
                "local training complete"
            );
            Ok(())
        };

        if self.config.parallel_clients {
            self.clients
                .par_iter_mut()
                .map(step)
                .collect::<Result<Vec<_>>>()?;
        } else {
            for client in &mut self.clients {
                step(client)?;
            }
        }
        Ok(())
    }

    /// Encode every client model, account for the transfers, and average
    /// the decoded models into the new coordinator model.
    fn aggregate(&mut self, round: usize) -> Result<()> {
        let original = self
            .clients
            .iter()
            .map(|c| model_size_in_bits(&c.params) as u128)
            .fold(1u128, u128::saturating_mul);

        let mut payloads = Vec::with_capacity(self.clients.len());
        for client in &self.clients {
            let payload = self.config.scheme.encode(&client.params).map_err(|e| {
                tracing::error!(round, client = client.id, error = %e, "client-side encode failed");
                e
            })?;
            payloads.push(payload);
        }

        let transferred = payloads
            .iter()
            .map(|p| payload_size_in_bits(p) as u128)
            .fold(1u128, u128::saturating_mul);
        self.state.client_traffic.push(BitsRecord {
            original,
            transferred,
            conserved: original.saturating_sub(transferred),
        });

        let decoded = payloads
            .iter()
            .map(|p| p.decode())
            .collect::<Result<Vec<_>>>()?;

        // ShapeMismatch / EmptyInput here is unrecoverable for the run;
        // the error carries the diagnostic.
        self.coordinator.params = average_models(&decoded)?;
        Ok(())
    }

    /// Score the coordinator model on the held-out test set.
    fn evaluate(&self) -> Result<StepMetrics> {
        let view = ShardView::new(self.test_data, &self.test_shard);
        self.evaluator.evaluate(&self.coordinator.params, view)
    }

    fn summary(&self, reached_target: bool) -> RunSummary {
        RunSummary {
            reached_target,
            rounds: self.state.rounds,
            final_accuracy: self.state.test_accuracies.last().copied().unwrap_or(0.0),
        }
    }

    /// The accumulated experiment record.
    pub fn state(&self) -> &ExperimentState {
        &self.state
    }

    /// The coordinator's current model.
    pub fn coordinator_params(&self) -> &ParamMap {
        &self.coordinator.params
    }

    /// The clients, in id order.
    pub fn clients(&self) -> &[Client] {
        &self.clients
    }

    /// The validation shard carved out at partition time, if any.
    pub fn validation_shard(&self) -> Option<&Shard> {
        self.validation.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedsim_core::ParamTensor;

    /// Trainer that nudges every parameter by a client-specific constant.
    struct NudgeTrainer;

    impl LocalTrainer for NudgeTrainer {
        fn train(
            &self,
            params: &mut ParamMap,
            data: ShardView<'_>,
            opts: &LocalOpts,
        ) -> Result<StepMetrics> {
            let delta = opts.learning_rate * data.len() as f32;
            for (_, tensor) in params.iter_mut() {
                for v in tensor.data_mut() {
                    *v += delta;
                }
            }
            Ok(StepMetrics {
                loss: 1.0,
                accuracy: 0.0,
            })
        }
    }

    /// Evaluator whose accuracy is a fixed ramp over rounds.
    struct RampEvaluator {
        per_round: f64,
        counter: std::sync::atomic::AtomicUsize,
    }

    impl RampEvaluator {
        fn new(per_round: f64) -> Self {
            Self {
                per_round,
                counter: std::sync::atomic::AtomicUsize::new(0),
            }
        }
    }

    impl Evaluator for RampEvaluator {
        fn evaluate(&self, _params: &ParamMap, _data: ShardView<'_>) -> Result<StepMetrics> {
            let n = self
                .counter
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
                + 1;
            Ok(StepMetrics {
                loss: 1.0 / n as f64,
                accuracy: (self.per_round * n as f64).min(1.0),
            })
        }
    }

    fn initial_model() -> ParamMap {
        let mut m = ParamMap::new();
        m.insert("w", ParamTensor::new(vec![0.0; 8], vec![8]).unwrap());
        m
    }

    fn setup<'a>(
        train: &'a LabeledDataset,
        test: &'a LabeledDataset,
        config: RoundConfig,
    ) -> Federation<'a, NudgeTrainer, RampEvaluator> {
        Federation::new(
            train,
            test,
            &PartitionConfig::iid(3),
            initial_model(),
            &[LocalOpts::default().epochs(1); 3],
            NudgeTrainer,
            RampEvaluator::new(0.25),
            config,
        )
        .unwrap()
    }

    #[test]
    fn stops_when_target_reached() {
        let train = LabeledDataset::synthetic(60, 2, 10, 0);
        let test = LabeledDataset::synthetic(20, 2, 10, 1);
        // ramp hits 0.75 after 3 rounds
        let mut fed = setup(&train, &test, RoundConfig::default().target_accuracy(0.7));
        let summary = fed.run().unwrap();
        assert!(summary.reached_target);
        assert_eq!(summary.rounds, 3);
        assert_eq!(fed.state().test_accuracies.len(), 3);
    }

    #[test]
    fn round_budget_bounds_the_loop() {
        let train = LabeledDataset::synthetic(60, 2, 10, 0);
        let test = LabeledDataset::synthetic(20, 2, 10, 1);
        let mut fed = setup(
            &train,
            &test,
            RoundConfig::default().target_accuracy(2.0).max_rounds(4),
        );
        let summary = fed.run().unwrap();
        assert!(!summary.reached_target);
        assert_eq!(summary.rounds, 4);
    }

    #[test]
    fn traffic_records_grow_per_round() {
        let train = LabeledDataset::synthetic(60, 2, 10, 0);
        let test = LabeledDataset::synthetic(20, 2, 10, 1);
        let mut fed = setup(
            &train,
            &test,
            RoundConfig::default()
                .target_accuracy(2.0)
                .max_rounds(3)
                .scheme(QuantScheme::AffineInt8),
        );
        fed.run().unwrap();

        let state = fed.state();
        // no broadcast in round 1
        assert_eq!(state.server_traffic.len(), 2);
        assert_eq!(state.client_traffic.len(), 3);
        for rec in &state.server_traffic {
            assert!(rec.transferred < rec.original);
            assert_eq!(rec.conserved, rec.original - rec.transferred);
        }
        for rec in &state.client_traffic {
            assert!(rec.transferred < rec.original);
        }
    }

    #[test]
    fn none_scheme_conserves_nothing() {
        let train = LabeledDataset::synthetic(60, 2, 10, 0);
        let test = LabeledDataset::synthetic(20, 2, 10, 1);
        let mut fed = setup(
            &train,
            &test,
            RoundConfig::default().target_accuracy(2.0).max_rounds(2),
        );
        fed.run().unwrap();
        for rec in fed.state().server_traffic.iter() {
            assert_eq!(rec.conserved, 0);
            assert_eq!(rec.original, rec.transferred);
        }
    }

    #[test]
    fn broadcast_installs_identical_models() {
        let train = LabeledDataset::synthetic(60, 2, 10, 0);
        let test = LabeledDataset::synthetic(20, 2, 10, 1);
        let mut fed = setup(
            &train,
            &test,
            RoundConfig::default().target_accuracy(2.0).max_rounds(2),
        );
        fed.run().unwrap();

        // Every client trained from the same snapshot, and with equal
        // shard sizes the nudge is identical, so the local models end the
        // round exactly equal.
        let first = fed.clients()[0].params.clone();
        assert!(fed.clients().iter().all(|c| c.params == first));
    }

    #[test]
    fn parallel_and_sequential_agree() {
        let train = LabeledDataset::synthetic(90, 2, 10, 0);
        let test = LabeledDataset::synthetic(20, 2, 10, 1);

        let run = |parallel: bool| {
            let mut fed = setup(
                &train,
                &test,
                RoundConfig::default()
                    .target_accuracy(2.0)
                    .max_rounds(3)
                    .parallel_clients(parallel),
            );
            fed.run().unwrap();
            fed.coordinator_params().clone()
        };

        assert_eq!(run(false), run(true));
    }

    #[test]
    fn mismatched_opts_rejected() {
        let train = LabeledDataset::synthetic(60, 2, 10, 0);
        let test = LabeledDataset::synthetic(20, 2, 10, 1);
        let result = Federation::new(
            &train,
            &test,
            &PartitionConfig::iid(3),
            initial_model(),
            &[LocalOpts::default(); 2],
            NudgeTrainer,
            RampEvaluator::new(0.5),
            RoundConfig::default(),
        );
        assert!(result.is_err());
    }
}
