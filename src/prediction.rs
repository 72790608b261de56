use crate::block_ffm;
use crate::error::Result;
use crate::loss_functions::{logloss as line_logloss, squash};
use crate::model::Model;
use crate::problem::{line_scale, target, LineSource, Node, Problem, ProblemView};

/// Probability of the positive class for one line. Nodes outside the model's
/// (feature, field) range do not contribute.
pub fn predict(nodes: &[Node], model: &Model) -> f32 {
    squash(raw_score(nodes, model))
}

/// `predict` over a node slice, for callers holding their own arrays
pub fn predict_array(nodes: &[Node], model: &Model) -> f32 {
    predict(nodes, model)
}

/// Prediction and log-loss of one labeled line, from a single pass over its pairs
pub fn predict_with_loss(nodes: &[Node], label: f32, model: &Model) -> (f32, f64) {
    let t = raw_score(nodes, model);
    (squash(t), line_logloss(target(label), t))
}

/// One prediction per line, in line order. A malformed problem is `InvalidInput`.
pub fn predict_batch(problem: &Problem, model: &Model) -> Result<Vec<f32>> {
    problem.validate()?;
    let view = problem.view();
    let mut predictions = Vec::with_capacity(view.len());
    predict_view(&view, model, &mut predictions);
    Ok(predictions)
}

/// One prediction per line of any source, blocks in order
pub fn predict_source<S: LineSource + ?Sized>(source: &mut S, model: &Model) -> Result<Vec<f32>> {
    let mut predictions = Vec::with_capacity(source.len());
    for b in 0..source.num_blocks() {
        let view = source.block(b)?;
        predict_view(&view, model, &mut predictions);
    }
    Ok(predictions)
}

/// Average log-loss of the model over the labels of `source`, 0 when it is empty
pub fn logloss<S: LineSource + ?Sized>(source: &mut S, model: &Model) -> Result<f64> {
    let mut loss: f64 = 0.0;
    let mut lines: usize = 0;
    for b in 0..source.num_blocks() {
        let view = source.block(b)?;
        for i in 0..view.len() {
            loss += predict_with_loss(view.line(i), view.labels[i], model).1;
        }
        lines += view.len();
    }
    if lines == 0 {
        return Ok(0.0);
    }
    Ok(loss / lines as f64)
}

#[inline]
fn raw_score(nodes: &[Node], model: &Model) -> f32 {
    // scales stored in a problem would match, recomputing keeps scoring independent of it
    let scale = if model.normalization { line_scale(nodes) } else { 1.0 };
    block_ffm::forward(nodes, scale, model)
}

fn predict_view(view: &ProblemView, model: &Model, predictions: &mut Vec<f32>) {
    for i in 0..view.len() {
        predictions.push(predict(view.line(i), model));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_epsilon;
    use crate::disk::{save_problem, DiskProblem};
    use crate::error::FfmError;
    use crate::model::init_model;
    use crate::parameters::Parameters;
    use crate::problem::tests::{node, sample_lines};
    use crate::problem::{convert, Line};
    use crate::trainer::train;

    fn trained_model() -> (Problem, Model) {
        let mut problem = convert(&sample_lines(), true).unwrap();
        let mut params = Parameters::default();
        params.nr_iters = 3;
        let model = train(&mut problem, None, &params).unwrap();
        (problem, model)
    }

    #[test]
    fn test_predict_is_idempotent() {
        let (mut problem, model) = trained_model();
        let nodes = problem.line(2).to_vec();
        let p = predict(&nodes, &model);
        assert!(p > 0.0 && p < 1.0);
        assert_eq!(predict(&nodes, &model), p);
        assert_eq!(predict_array(&nodes, &model), p);

        // another training run in between changes nothing
        let mut params = Parameters::default();
        params.seed = 9;
        train(&mut problem, None, &params).unwrap();
        assert_eq!(predict(&nodes, &model), p);
    }

    #[test]
    fn test_normalization_invariance() {
        let (problem, model) = trained_model();
        assert!(model.normalization);
        let nodes = problem.line(2).to_vec();
        let scaled: Vec<Node> = nodes.iter().map(|n| node(n.field, n.feature, n.value * 3.0)).collect();
        assert_epsilon!(predict(&scaled, &model), predict(&nodes, &model));
    }

    #[test]
    fn test_out_of_range_is_skipped() {
        let (problem, model) = trained_model();
        let unseen = [node(0, 0, 1.0), node(1, 1000, 1.0), node(77, 2, 1.0)];
        let p = predict(&unseen, &model);
        assert!(p.is_finite());
        // only one known node is left, it has nobody to pair with
        assert_eq!(p, 0.5);
        assert_eq!(predict(&[], &model), 0.5);

        let mut params = Parameters::default();
        params.normalization = false;
        let model = init_model(&problem, &params).unwrap();
        let known = [node(0, 0, 1.0), node(1, 3, 0.5)];
        let with_unseen = [node(0, 0, 1.0), node(5, 3, 1.0), node(1, 3, 0.5), node(0, 99, 1.0)];
        assert_eq!(predict(&known, &model), predict(&with_unseen, &model));
    }

    #[test]
    fn test_predict_batch_and_source() {
        let (problem, model) = trained_model();
        let batch = predict_batch(&problem, &model).unwrap();
        assert_eq!(batch.len(), 3);
        for i in 0..3 {
            assert_eq!(batch[i], predict(problem.line(i), &model));
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.bin");
        save_problem(&problem, &path).unwrap();
        let mut disk = DiskProblem::open_with_block_nodes(&path, 2).unwrap();
        assert_eq!(predict_source(&mut disk, &model).unwrap(), batch);
    }

    #[test]
    fn test_predict_batch_rejects_malformed() {
        let (problem, model) = trained_model();
        let mut broken = problem.clone();
        broken.pos.pop();
        assert!(matches!(predict_batch(&broken, &model), Err(FfmError::InvalidInput(_))));

        let mut broken = problem;
        broken.pos[1] = 7;
        assert!(matches!(predict_batch(&broken, &model), Err(FfmError::InvalidInput(_))));
    }

    #[test]
    fn test_logloss() {
        let mut problem = convert(
            &[
                Line { nodes: vec![node(0, 0, 1.0), node(1, 1, 1.0)], label: 1.0 },
                Line { nodes: vec![node(0, 1, 1.0), node(1, 0, 1.0)], label: -1.0 },
            ],
            false,
        )
        .unwrap();
        let mut model = Model::new_zeroed(2, 2, 1, false).unwrap();
        assert_epsilon!(logloss(&mut problem, &model).unwrap() as f32, std::f32::consts::LN_2);

        // a confident right answer on line 0 and a wrong one on line 1
        model.weights.fill(2.0);
        let expected = (line_logloss(1.0, 4.0) + line_logloss(-1.0, 4.0)) / 2.0;
        assert_eq!(logloss(&mut problem, &model).unwrap(), expected);

        let (p, l) = predict_with_loss(problem.line(1), -1.0, &model);
        assert_eq!(p, squash(4.0));
        assert_eq!(l, line_logloss(-1.0, 4.0));

        let mut empty = convert(&[], true).unwrap();
        assert_eq!(logloss(&mut empty, &model).unwrap(), 0.0);
    }
}
