use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::disk::DiskProblem;
use crate::error::{try_alloc, FfmError, Result};
use crate::hogwild::HogwildTrainer;
use crate::model::{init_model, Model};
use crate::optimizer::OptimizerAdagrad;
use crate::parameters::Parameters;
use crate::prediction;
use crate::problem::LineSource;

/// What one epoch of `train` reported
#[derive(Clone, Debug)]
pub struct EpochStats {
    pub iter: u32,
    pub tr_logloss: f64,
    pub va_logloss: Option<f64>,
    pub elapsed: Duration,
}

/// Generator used for line order. It starts from the initialization seed, jumped
/// ahead so the two streams never overlap.
pub fn shuffle_rng(seed: u64) -> Xoshiro256PlusPlus {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
    rng.jump();
    rng
}

/// One pass over every line of `source`, in a fresh random order. Blocks are
/// visited in random order and lines are shuffled within each block.
/// Returns the average log-loss of the pass, each line scored before its own update.
pub fn train_iteration<S, R>(source: &mut S, model: &mut Model, params: &Parameters, rng: &mut R) -> Result<f64>
where
    S: LineSource + ?Sized,
    R: Rng + ?Sized,
{
    params.validate()?;
    model.check_fits(&*source)?;

    let optimizer = OptimizerAdagrad::new(params.eta, params.lambda);
    let hogwild = HogwildTrainer::new(params.nr_threads);
    let normalization = model.normalization;
    let shape = model.shape();

    let mut blocks: Vec<usize> = (0..source.num_blocks()).collect();
    blocks.shuffle(rng);

    let mut loss: f64 = 0.0;
    let mut lines: usize = 0;
    let mut order: Vec<usize> = Vec::new();
    for b in blocks {
        let view = source.block(b)?;
        order.clear();
        order.extend(0..view.len());
        order.shuffle(rng);
        loss += hogwild.learn_block(&view, &order, normalization, &optimizer, model.shared_weights(), shape);
        lines += view.len();
    }

    if lines == 0 {
        return Ok(0.0);
    }
    Ok(loss / lines as f64)
}

/// Initializes a model from `tr` and runs up to `nr_iters` epochs
pub fn train<S: LineSource + ?Sized>(
    tr: &mut S,
    va: Option<&mut dyn LineSource>,
    params: &Parameters,
) -> Result<Model> {
    train_with_history(tr, va, params).map(|(model, _)| model)
}

/// Same as `train`, also returning the per-epoch statistics.
/// With `auto_stop`, the epoch that fails to lower the validation loss is rolled back.
pub fn train_with_history<S: LineSource + ?Sized>(
    tr: &mut S,
    mut va: Option<&mut dyn LineSource>,
    params: &Parameters,
) -> Result<(Model, Vec<EpochStats>)> {
    params.validate()?;
    if params.auto_stop && va.is_none() {
        return Err(FfmError::invalid("auto-stop requires a validation set"));
    }

    let mut model = init_model(&*tr, params)?;
    let mut rng = shuffle_rng(params.seed);
    // nr_iters may be u32::MAX when auto_stop decides the end
    let mut history: Vec<EpochStats> = Vec::new();

    let mut snapshot: Vec<f32> = if params.auto_stop {
        try_alloc(model.weights.len() as u128, "auto-stop snapshot")?
    } else {
        Vec::new()
    };
    let mut best_va_logloss = f64::INFINITY;

    log::info!("{:>4} {:>13} {:>13} {:>9}", "iter", "tr_logloss", "va_logloss", "tr_time");
    for iter in 1..=params.nr_iters {
        if params.auto_stop {
            snapshot.clear();
            snapshot.extend_from_slice(&model.weights);
        }

        let start = Instant::now();
        let tr_logloss = train_iteration(tr, &mut model, params, &mut rng)?;
        let elapsed = start.elapsed();

        let va_logloss = match va.as_deref_mut() {
            Some(source) => Some(prediction::logloss(source, &model)?),
            None => None,
        };
        match va_logloss {
            Some(l) => log::info!("{:>4} {:>13.5} {:>13.5} {:>9.1}", iter, tr_logloss, l, elapsed.as_secs_f64()),
            None => log::info!("{:>4} {:>13.5} {:>13} {:>9.1}", iter, tr_logloss, "", elapsed.as_secs_f64()),
        }
        history.push(EpochStats { iter, tr_logloss, va_logloss, elapsed });

        if params.auto_stop {
            if let Some(l) = va_logloss {
                if !(l < best_va_logloss) {
                    model.weights.copy_from_slice(&snapshot);
                    log::info!("Auto-stop. Use model at {}th iteration.", iter - 1);
                    break;
                }
                best_va_logloss = l;
            }
        }
    }
    Ok((model, history))
}

/// Trains out-of-core from binary problem files written by `materialize_to_disk`
pub fn train_on_disk<P: AsRef<Path>>(tr_path: P, va_path: Option<&Path>, params: &Parameters) -> Result<Model> {
    let mut tr = DiskProblem::open(tr_path)?;
    let mut va = match va_path {
        Some(path) => Some(DiskProblem::open(path)?),
        None => None,
    };
    log::info!("training on {} ({} lines, {} blocks)", tr.path().display(), tr.len(), tr.num_blocks());
    train(&mut tr, va.as_mut().map(|v| v as &mut dyn LineSource), params)
}
