//! Segmentation quality metrics.
//!
//! Pure functions over (H, W, 4) one-hot or probability tensors, matching
//! the numeric conventions the pretrained network was evaluated with
//! (Dice smoothing 1.0, per-class epsilon 1e-6, count epsilon 1e-7).

use ndarray::{ArrayView3, Axis};

const DICE_SMOOTH: f32 = 1.0;
const DICE_CLASS_EPSILON: f32 = 1e-6;
const COUNT_EPSILON: f32 = 1e-7;

fn round01(value: f32) -> f32 {
    value.clamp(0.0, 1.0).round()
}

/// Mean Dice coefficient across all four classes.
pub fn dice_coef(y_true: ArrayView3<'_, f32>, y_pred: ArrayView3<'_, f32>) -> f32 {
    let classes = y_true.len_of(Axis(2));
    let mut dice = 0.0f32;

    for class in 0..classes {
        let truth = y_true.index_axis(Axis(2), class);
        let pred = y_pred.index_axis(Axis(2), class);

        let intersection: f32 = truth.iter().zip(pred.iter()).map(|(&t, &p)| t * p).sum();
        let union: f32 = truth.iter().sum::<f32>() + pred.iter().sum::<f32>();

        dice += (2.0 * intersection + DICE_SMOOTH) / (union + DICE_SMOOTH);
    }

    dice / classes as f32
}

/// Dice coefficient for one class, squared-denominator variant.
pub fn dice_coef_class(
    y_true: ArrayView3<'_, f32>,
    y_pred: ArrayView3<'_, f32>,
    class_index: usize,
) -> f32 {
    let truth = y_true.index_axis(Axis(2), class_index);
    let pred = y_pred.index_axis(Axis(2), class_index);

    let intersection: f32 = truth
        .iter()
        .zip(pred.iter())
        .map(|(&t, &p)| (t * p).abs())
        .sum();
    let denominator: f32 =
        truth.iter().map(|&t| t * t).sum::<f32>() + pred.iter().map(|&p| p * p).sum::<f32>();

    (2.0 * intersection) / (denominator + DICE_CLASS_EPSILON)
}

pub fn dice_necrotic(y_true: ArrayView3<'_, f32>, y_pred: ArrayView3<'_, f32>) -> f32 {
    dice_coef_class(y_true, y_pred, 1)
}

pub fn dice_edema(y_true: ArrayView3<'_, f32>, y_pred: ArrayView3<'_, f32>) -> f32 {
    dice_coef_class(y_true, y_pred, 2)
}

pub fn dice_enhancing(y_true: ArrayView3<'_, f32>, y_pred: ArrayView3<'_, f32>) -> f32 {
    dice_coef_class(y_true, y_pred, 3)
}

/// Fraction of predicted positives that are true positives.
pub fn precision(y_true: ArrayView3<'_, f32>, y_pred: ArrayView3<'_, f32>) -> f32 {
    let true_positives: f32 = y_true
        .iter()
        .zip(y_pred.iter())
        .map(|(&t, &p)| round01(t * p))
        .sum();
    let predicted_positives: f32 = y_pred.iter().map(|&p| round01(p)).sum();

    true_positives / (predicted_positives + COUNT_EPSILON)
}

/// Fraction of actual positives that were predicted (recall).
pub fn sensitivity(y_true: ArrayView3<'_, f32>, y_pred: ArrayView3<'_, f32>) -> f32 {
    let true_positives: f32 = y_true
        .iter()
        .zip(y_pred.iter())
        .map(|(&t, &p)| round01(t * p))
        .sum();
    let possible_positives: f32 = y_true.iter().map(|&t| round01(t)).sum();

    true_positives / (possible_positives + COUNT_EPSILON)
}

/// Fraction of actual negatives that were predicted negative.
pub fn specificity(y_true: ArrayView3<'_, f32>, y_pred: ArrayView3<'_, f32>) -> f32 {
    let true_negatives: f32 = y_true
        .iter()
        .zip(y_pred.iter())
        .map(|(&t, &p)| round01((1.0 - t) * (1.0 - p)))
        .sum();
    let possible_negatives: f32 = y_true.iter().map(|&t| round01(1.0 - t)).sum();

    true_negatives / (possible_negatives + COUNT_EPSILON)
}
