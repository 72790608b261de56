use crate::loss_functions::{logloss, logloss_gradient};
use crate::model::{Model, ModelShape};
use crate::multithread_helpers::SharedWeights;
use crate::optimizer::OptimizerAdagrad;
use crate::problem::{target, Node};

// Pairwise field-aware interactions. For nodes a < b the line contributes
//     dot(W[feature_a, field_b], W[feature_b, field_a]) * value_a * value_b * scale
// Intra-field pairs are included, a node is never paired with itself.

/// Raw score over a trained model. Nodes whose feature or field has no slot in
/// the model are left out of every pair.
pub fn forward(nodes: &[Node], scale: f32, model: &Model) -> f32 {
    let shape = model.shape();
    let k = shape.k as usize;
    let weights = &model.weights;
    let mut wsum: f32 = 0.0;
    for (i, left) in nodes.iter().enumerate() {
        if !shape.contains(left.feature, left.field) {
            continue;
        }
        for right in &nodes[i + 1..] {
            if !shape.contains(right.feature, right.field) {
                continue;
            }
            let lindex = shape.offset(left.feature, right.field);
            let rindex = shape.offset(right.feature, left.field);
            let joint_value = left.value * right.value * scale;
            let dot: f32 = weights[lindex..lindex + k]
                .iter()
                .zip(&weights[rindex..rindex + k])
                .map(|(l, r)| l * r)
                .sum();
            wsum += dot * joint_value;
        }
    }
    wsum
}

/// Same score as `forward`, read from the shared training buffer. All nodes must fit the shape.
pub fn forward_shared(nodes: &[Node], scale: f32, weights: &SharedWeights, shape: ModelShape) -> f32 {
    let k = shape.k as usize;
    let mut wsum: f32 = 0.0;
    for (i, left) in nodes.iter().enumerate() {
        for right in &nodes[i + 1..] {
            let lindex = shape.offset(left.feature, right.field);
            let rindex = shape.offset(right.feature, left.field);
            let joint_value = left.value * right.value * scale;
            let mut dot: f32 = 0.0;
            for d in 0..k {
                dot += weights.load(lindex + d) * weights.load(rindex + d);
            }
            wsum += dot * joint_value;
        }
    }
    wsum
}

/// One AdaGrad step on both vectors of every pair. `kappa` is the loss gradient
/// with respect to the raw score.
pub fn backward_shared(
    nodes: &[Node],
    scale: f32,
    kappa: f32,
    optimizer: &OptimizerAdagrad,
    weights: &SharedWeights,
    shape: ModelShape,
) {
    let k = shape.k as usize;
    for (i, left) in nodes.iter().enumerate() {
        for right in &nodes[i + 1..] {
            let lindex = shape.offset(left.feature, right.field);
            let rindex = shape.offset(right.feature, left.field);
            let kappa_v = kappa * (left.value * right.value * scale);
            for d in 0..k {
                // accumulator of dimension d sits k floats after its weight
                let (lw, lacc) = (lindex + d, lindex + k + d);
                let (rw, racc) = (rindex + d, rindex + k + d);
                let left_weight = weights.load(lw);
                let right_weight = weights.load(rw);
                let left_gradient = optimizer.gradient(kappa_v, left_weight, right_weight);
                let right_gradient = optimizer.gradient(kappa_v, right_weight, left_weight);

                let mut left_acc = weights.load(lacc);
                let mut right_acc = weights.load(racc);
                let left_update = optimizer.calculate_update(left_gradient, &mut left_acc);
                let right_update = optimizer.calculate_update(right_gradient, &mut right_acc);
                weights.store(lacc, left_acc);
                weights.store(racc, right_acc);
                weights.store(lw, left_weight - left_update);
                weights.store(rw, right_weight - right_update);
            }
        }
    }
}

/// Scores one line, takes the gradient step and returns its log-loss
#[inline]
pub fn learn_line(
    nodes: &[Node],
    label: f32,
    scale: f32,
    optimizer: &OptimizerAdagrad,
    weights: &SharedWeights,
    shape: ModelShape,
) -> f64 {
    let wsum = forward_shared(nodes, scale, weights, shape);
    let y = target(label);
    let kappa = logloss_gradient(y, wsum);
    backward_shared(nodes, scale, kappa, optimizer, weights, shape);
    logloss(y, wsum)
}
