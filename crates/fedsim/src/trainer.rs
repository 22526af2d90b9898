// Reference collaborator — a dense softmax classifier with mini-batch SGD
//
// Input(d) → Linear(d, hidden) → ReLU → Linear(hidden, classes) → softmax CE
//
// The round orchestrator only sees this type through the LocalTrainer and
// Evaluator traits; any gradient-based collaborator with the same traits
// drops in unchanged. Parameter layout:
//
//   fc1.weight  [hidden, input]
//   fc1.bias    [hidden]
//   fc2.weight  [classes, hidden]
//   fc2.bias    [classes]

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use fedsim_core::{bail, Error, ParamMap, ParamTensor, Result};
use fedsim_data::ShardView;

use crate::round::{Evaluator, LocalOpts, LocalTrainer, StepMetrics};

/// A two-layer dense classifier trained with plain SGD.
#[derive(Debug, Clone, Copy)]
pub struct DenseClassifier {
    pub input_dim: usize,
    pub hidden_dim: usize,
    pub num_classes: usize,
}

impl DenseClassifier {
    pub fn new(input_dim: usize, hidden_dim: usize, num_classes: usize) -> Self {
        Self {
            input_dim,
            hidden_dim,
            num_classes,
        }
    }

    /// A freshly initialized parameter mapping: normal weights scaled by
    /// 1/sqrt(fan_in), zero biases.
    pub fn init_params(&self, seed: u64) -> ParamMap {
        let mut rng = StdRng::seed_from_u64(seed);
        let std1 = 1.0 / (self.input_dim as f32).sqrt();
        let std2 = 1.0 / (self.hidden_dim as f32).sqrt();

        let mut params = ParamMap::new();
        params.insert(
            "fc1.weight",
            ParamTensor::randn(vec![self.hidden_dim, self.input_dim], std1, &mut rng),
        );
        params.insert("fc1.bias", ParamTensor::zeros(vec![self.hidden_dim]));
        params.insert(
            "fc2.weight",
            ParamTensor::randn(vec![self.num_classes, self.hidden_dim], std2, &mut rng),
        );
        params.insert("fc2.bias", ParamTensor::zeros(vec![self.num_classes]));
        params
    }

    /// Fetch a tensor and verify its shape against the architecture.
    fn tensor<'m>(&self, params: &'m ParamMap, name: &str, shape: &[usize]) -> Result<&'m ParamTensor> {
        let t = params
            .get(name)
            .ok_or_else(|| Error::KeyMismatch(format!("missing parameter {name:?}")))?;
        if t.shape() != shape {
            return Err(Error::ShapeMismatch {
                name: name.to_string(),
                expected: shape.to_vec(),
                got: t.shape().to_vec(),
            });
        }
        Ok(t)
    }

    /// Forward pass for one sample. Returns (pre-activation, hidden, logits).
    fn forward(&self, w: &Weights, x: &[f32]) -> (Vec<f32>, Vec<f32>, Vec<f32>) {
        let h_pre: Vec<f32> = (0..self.hidden_dim)
            .map(|j| {
                let row = &w.w1[j * self.input_dim..(j + 1) * self.input_dim];
                w.b1[j] + dot(row, x)
            })
            .collect();
        let h: Vec<f32> = h_pre.iter().map(|&v| v.max(0.0)).collect();
        let logits: Vec<f32> = (0..self.num_classes)
            .map(|c| {
                let row = &w.w2[c * self.hidden_dim..(c + 1) * self.hidden_dim];
                w.b2[c] + dot(row, &h)
            })
            .collect();
        (h_pre, h, logits)
    }

    fn check_data(&self, data: &ShardView<'_>) -> Result<()> {
        if data.feature_dim() != self.input_dim {
            bail!(
                "dataset has {}-dimensional features, model expects {}",
                data.feature_dim(),
                self.input_dim
            );
        }
        if data.num_classes() != self.num_classes {
            bail!(
                "dataset has {} classes, model expects {}",
                data.num_classes(),
                self.num_classes
            );
        }
        Ok(())
    }
}

/// Borrowed parameter slices for the forward/backward math.
struct Weights<'m> {
    w1: &'m [f32],
    b1: &'m [f32],
    w2: &'m [f32],
    b2: &'m [f32],
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Numerically stable softmax probabilities.
fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

impl LocalTrainer for DenseClassifier {
    fn train(
        &self,
        params: &mut ParamMap,
        data: ShardView<'_>,
        opts: &LocalOpts,
    ) -> Result<StepMetrics> {
        if data.is_empty() {
            // An empty shard (degenerate partition) trains nothing.
            return Ok(StepMetrics {
                loss: 0.0,
                accuracy: 0.0,
            });
        }
        self.check_data(&data)?;

        let (hd, id, nc) = (self.hidden_dim, self.input_dim, self.num_classes);

        // Working copies; written back after the local epochs.
        let mut w1 = self
            .tensor(params, "fc1.weight", &[hd, id])?
            .data()
            .to_vec();
        let mut b1 = self.tensor(params, "fc1.bias", &[hd])?.data().to_vec();
        let mut w2 = self
            .tensor(params, "fc2.weight", &[nc, hd])?
            .data()
            .to_vec();
        let mut b2 = self.tensor(params, "fc2.bias", &[nc])?.data().to_vec();

        let mut rng = StdRng::seed_from_u64(opts.seed);
        let batch_size = opts.batch_size.max(1);

        let mut g_w1 = vec![0.0f32; w1.len()];
        let mut g_b1 = vec![0.0f32; b1.len()];
        let mut g_w2 = vec![0.0f32; w2.len()];
        let mut g_b2 = vec![0.0f32; b2.len()];

        for _epoch in 0..opts.epochs {
            let mut order: Vec<usize> = (0..data.len()).collect();
            order.shuffle(&mut rng);

            for batch in order.chunks(batch_size) {
                g_w1.fill(0.0);
                g_b1.fill(0.0);
                g_w2.fill(0.0);
                g_b2.fill(0.0);

                for &i in batch {
                    let x = data.feature(i);
                    let y = data.label(i) as usize;

                    let weights = Weights {
                        w1: &w1,
                        b1: &b1,
                        w2: &w2,
                        b2: &b2,
                    };
                    let (h_pre, h, logits) = self.forward(&weights, x);
                    let p = softmax(&logits);

                    // dL/dlogit = p - onehot(y)
                    let mut d_logit = p;
                    d_logit[y] -= 1.0;

                    for c in 0..nc {
                        let d = d_logit[c];
                        g_b2[c] += d;
                        for j in 0..hd {
                            g_w2[c * hd + j] += d * h[j];
                        }
                    }

                    // backprop through ReLU into layer 1
                    for j in 0..hd {
                        if h_pre[j] <= 0.0 {
                            continue;
                        }
                        let mut dh = 0.0;
                        for c in 0..nc {
                            dh += w2[c * hd + j] * d_logit[c];
                        }
                        g_b1[j] += dh;
                        for (gi, &xi) in g_w1[j * id..(j + 1) * id].iter_mut().zip(x) {
                            *gi += dh * xi;
                        }
                    }
                }

                let step = opts.learning_rate / batch.len() as f32;
                for (w, g) in w1.iter_mut().zip(&g_w1) {
                    *w -= step * g;
                }
                for (w, g) in b1.iter_mut().zip(&g_b1) {
                    *w -= step * g;
                }
                for (w, g) in w2.iter_mut().zip(&g_w2) {
                    *w -= step * g;
                }
                for (w, g) in b2.iter_mut().zip(&g_b2) {
                    *w -= step * g;
                }
            }
        }

        params.insert("fc1.weight", ParamTensor::new(w1, vec![hd, id])?);
        params.insert("fc1.bias", ParamTensor::new(b1, vec![hd])?);
        params.insert("fc2.weight", ParamTensor::new(w2, vec![nc, hd])?);
        params.insert("fc2.bias", ParamTensor::new(b2, vec![nc])?);

        self.evaluate(params, data)
    }
}

impl Evaluator for DenseClassifier {
    fn evaluate(&self, params: &ParamMap, data: ShardView<'_>) -> Result<StepMetrics> {
        if data.is_empty() {
            return Ok(StepMetrics {
                loss: 0.0,
                accuracy: 0.0,
            });
        }
        self.check_data(&data)?;

        let (hd, id, nc) = (self.hidden_dim, self.input_dim, self.num_classes);
        let weights = Weights {
            w1: self.tensor(params, "fc1.weight", &[hd, id])?.data(),
            b1: self.tensor(params, "fc1.bias", &[hd])?.data(),
            w2: self.tensor(params, "fc2.weight", &[nc, hd])?.data(),
            b2: self.tensor(params, "fc2.bias", &[nc])?.data(),
        };

        let mut loss = 0.0f64;
        let mut correct = 0usize;
        for i in 0..data.len() {
            let x = data.feature(i);
            let y = data.label(i) as usize;
            let (_, _, logits) = self.forward(&weights, x);
            let p = softmax(&logits);
            loss += -(p[y].max(1e-12) as f64).ln();
            if argmax(&logits) == y {
                correct += 1;
            }
        }

        Ok(StepMetrics {
            loss: loss / data.len() as f64,
            accuracy: correct as f64 / data.len() as f64,
        })
    }
}
