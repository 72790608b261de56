use std::thread;

use crate::block_ffm;
use crate::model::ModelShape;
use crate::multithread_helpers::SharedWeights;
use crate::optimizer::OptimizerAdagrad;
use crate::problem::ProblemView;

// Below this many lines per worker, spawning costs more than it saves
const MIN_LINES_PER_WORKER: usize = 64;

/// Splits the lines of a block between worker threads that update the shared
/// weights without locking. With one thread everything runs on the caller's thread,
/// in order, which makes training reproducible for a fixed seed.
pub struct HogwildTrainer {
    nr_threads: usize,
}

pub struct HogwildWorker<'a> {
    view: &'a ProblemView<'a>,
    normalization: bool,
    optimizer: OptimizerAdagrad,
    weights: SharedWeights<'a>,
    shape: ModelShape,
}

impl HogwildTrainer {
    pub fn new(nr_threads: usize) -> HogwildTrainer {
        HogwildTrainer { nr_threads: nr_threads.max(1) }
    }

    /// Learns lines of `view` in the given order, returns the summed log-loss
    pub fn learn_block(
        &self,
        view: &ProblemView,
        order: &[usize],
        normalization: bool,
        optimizer: &OptimizerAdagrad,
        weights: SharedWeights,
        shape: ModelShape,
    ) -> f64 {
        let worker = HogwildWorker {
            view,
            normalization,
            optimizer: *optimizer,
            weights,
            shape,
        };
        let workers = self.nr_threads.min(order.len() / MIN_LINES_PER_WORKER).max(1);
        if workers == 1 {
            return worker.learn(order);
        }

        let chunk_len = (order.len() + workers - 1) / workers;
        let worker = &worker;
        thread::scope(|s| {
            let handles: Vec<_> = order
                .chunks(chunk_len)
                .map(|lines| s.spawn(move || worker.learn(lines)))
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                .sum()
        })
    }
}

impl<'a> HogwildWorker<'a> {
    fn learn(&self, lines: &[usize]) -> f64 {
        let mut loss: f64 = 0.0;
        for &i in lines {
            loss += block_ffm::learn_line(
                self.view.line(i),
                self.view.labels[i],
                self.view.scale(i, self.normalization),
                &self.optimizer,
                &self.weights,
                self.shape,
            );
        }
        loss
    }
}
