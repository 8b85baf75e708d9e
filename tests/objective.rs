//! Integration tests for the encoder cache and the weighted objective.

mod common;

use common::{CountingExtractor, FailingPenalty, constant, pattern, setup};
use numr::autograd::Var;
use numr::runtime::cpu::CpuRuntime;
use std::sync::atomic::Ordering;
use stylr::encoder::Encoder;
use stylr::loss::{LayerWeighting, LossAggregator};
use stylr::operation::{ContentOperation, GramOperation, TotalVariationOperation};
use stylr::{Error, ExecutionContext};

fn scalar(var: &Var<CpuRuntime>) -> f64 {
    var.tensor().to_vec::<f32>()[0] as f64
}

fn aggregator(extractor: CountingExtractor) -> LossAggregator<CpuRuntime> {
    let (_client, device) = setup();
    LossAggregator::new(Encoder::new(ExecutionContext::f32(device), Box::new(extractor)))
}

#[test]
fn test_one_forward_per_evaluation() {
    let (client, device) = setup();
    let extractor = CountingExtractor::new(&["a", "b", "c"]);
    let calls = extractor.calls.clone();
    let mut agg = aggregator(extractor);
    agg.add("content", Box::new(ContentOperation::new("a")), 1.0).unwrap();
    agg.add_layers(
        "style",
        &["a".to_string(), "c".to_string()],
        2.0,
        &LayerWeighting::Sum,
        |layer| Box::new(GramOperation::new(layer)),
    )
    .unwrap();

    agg.set_content_image(&client, &pattern(2, 4, 4, &device)).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    agg.set_style_image(&client, &pattern(2, 6, 6, &device)).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    let image = Var::new(constant(0.3, 2, 4, 4, &device), true);
    agg.evaluate(&client, &image).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // Same image, cache still valid
    agg.evaluate(&client, &image).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    agg.invalidate_cache();
    agg.evaluate(&client, &image).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 4);

    // A different image invalidates on its own
    let other = Var::new(constant(0.6, 2, 4, 4, &device), true);
    agg.evaluate(&client, &other).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 5);
}

#[test]
fn test_cached_encoding_is_identical() {
    let (client, device) = setup();
    let extractor = CountingExtractor::new(&["a", "b"]);
    let calls = extractor.calls.clone();
    let mut encoder = Encoder::new(ExecutionContext::f32(device.clone()), Box::new(extractor));
    let layers = vec!["a".to_string(), "b".to_string()];
    let image = Var::new(pattern(2, 4, 4, &device), true);

    let first = encoder.encode(&client, &image, &layers).unwrap();
    let second = encoder.encode(&client, &image, &layers).unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for layer in &layers {
        assert_eq!(first[layer].id(), second[layer].id());
        assert_eq!(
            first[layer].tensor().to_vec::<f32>(),
            second[layer].tensor().to_vec::<f32>()
        );
    }
}

#[test]
fn test_zero_loss_at_target() {
    let (client, device) = setup();
    let mut agg = aggregator(CountingExtractor::new(&["a", "b"]));
    agg.add("content", Box::new(ContentOperation::new("b")), 1.0).unwrap();
    agg.add("style", Box::new(GramOperation::new("a")), 1.0).unwrap();
    let reference = pattern(3, 5, 5, &device);
    agg.set_content_image(&client, &reference).unwrap();
    agg.set_style_image(&client, &reference).unwrap();

    let image = Var::new(reference.clone(), true);
    let loss = agg.evaluate(&client, &image).unwrap();
    assert!(scalar(&loss).abs() < 1e-10, "loss = {}", scalar(&loss));
}

#[test]
fn test_total_is_weighted_sum_of_children() {
    let (client, device) = setup();
    let mut agg = aggregator(CountingExtractor::new(&["a", "b"]));
    agg.add("content", Box::new(ContentOperation::new("a")), 3.0).unwrap();
    agg.add("style", Box::new(GramOperation::new("b")), 0.5).unwrap();
    agg.add("tv", Box::new(TotalVariationOperation::new()), 2.0).unwrap();
    agg.set_content_image(&client, &constant(0.2, 1, 4, 4, &device)).unwrap();
    agg.set_style_image(&client, &constant(0.9, 1, 4, 4, &device)).unwrap();

    let image = Var::new(pattern(1, 4, 4, &device), true);
    let (total, breakdown) = agg.evaluate_with_breakdown(&client, &image).unwrap();
    let parts: f64 = ["content", "style", "tv"]
        .iter()
        .map(|name| breakdown.get(name).unwrap())
        .sum();
    assert!((scalar(&total) - parts).abs() < 1e-5 * parts.max(1.0));
    assert!((breakdown.total() - parts).abs() < 1e-9);

    // Doubling one weight doubles exactly that child's contribution
    let content_before = breakdown.get("content").unwrap();
    agg.set_weight("content", 6.0).unwrap();
    let (_, doubled) = agg.evaluate_with_breakdown(&client, &image).unwrap();
    let content_after = doubled.get("content").unwrap();
    assert!((content_after - 2.0 * content_before).abs() < 1e-5 * content_after.max(1.0));
    assert!((doubled.get("style").unwrap() - breakdown.get("style").unwrap()).abs() < 1e-9);
}

#[test]
fn test_zero_weight_child_is_not_evaluated() {
    let (client, device) = setup();
    let mut agg = aggregator(CountingExtractor::new(&["a"]));
    agg.add("content", Box::new(ContentOperation::new("a")), 1.0).unwrap();
    let penalty = FailingPenalty::nan_loss(1);
    let penalty_calls = penalty.calls.clone();
    agg.add("penalty", Box::new(penalty), 0.0).unwrap();
    agg.set_content_image(&client, &constant(0.5, 1, 3, 3, &device)).unwrap();

    let image = Var::new(pattern(1, 3, 3, &device), true);
    let (total, breakdown) = agg.evaluate_with_breakdown(&client, &image).unwrap();
    assert!(scalar(&total).is_finite());
    assert_eq!(breakdown.get("penalty"), Some(0.0));
    assert_eq!(penalty_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_registration_errors() {
    let (client, device) = setup();
    let mut agg = aggregator(CountingExtractor::new(&["a"]));
    assert!(matches!(
        agg.add("content", Box::new(ContentOperation::new("missing")), 1.0),
        Err(Error::Configuration { .. })
    ));
    agg.add("content", Box::new(ContentOperation::new("a")), 1.0).unwrap();
    assert!(matches!(
        agg.add("content", Box::new(ContentOperation::new("a")), 1.0),
        Err(Error::Configuration { .. })
    ));

    // No target yet
    let image = Var::new(pattern(1, 3, 3, &device), true);
    assert!(matches!(agg.evaluate(&client, &image), Err(Error::State { .. })));
}

#[test]
fn test_zero_weight_child_target_does_not_affect_total() {
    let (client, device) = setup();
    let mut agg = aggregator(CountingExtractor::new(&["a", "b"]));
    agg.add("content", Box::new(ContentOperation::new("a")), 1.0).unwrap();
    agg.add("style", Box::new(GramOperation::new("b")), 0.0).unwrap();
    agg.set_content_image(&client, &constant(0.4, 2, 4, 4, &device)).unwrap();
    agg.set_style_image(&client, &constant(0.1, 2, 4, 4, &device)).unwrap();

    let image = Var::new(pattern(2, 4, 4, &device), true);
    let before = scalar(&agg.evaluate(&client, &image).unwrap());
    agg.set_style_image(&client, &pattern(2, 8, 8, &device)).unwrap();
    agg.invalidate_cache();
    let after = scalar(&agg.evaluate(&client, &image).unwrap());
    assert_eq!(before, after);
}

#[test]
fn test_single_child_is_identity() {
    let (client, device) = setup();
    let mut agg = aggregator(CountingExtractor::new(&["a"]));
    let mut reference = ContentOperation::new("a");
    agg.add("content", Box::new(ContentOperation::new("a")), 1.0).unwrap();
    agg.set_content_image(&client, &constant(0.25, 1, 3, 3, &device)).unwrap();

    // The same operation evaluated directly on the encoding of the image
    let target = agg
        .encoder_mut()
        .encode_reference(&client, &constant(0.25, 1, 3, 3, &device), &["a".to_string()])
        .unwrap();
    stylr::Operation::<CpuRuntime>::set_target(&mut reference, &client, &target["a"]).unwrap();

    let image = Var::new(pattern(1, 3, 3, &device), true);
    let total = scalar(&agg.evaluate(&client, &image).unwrap());
    let direct = stylr::Operation::<CpuRuntime>::evaluate(&reference, &client, &image).unwrap();
    assert!((total - scalar(&direct)).abs() < 1e-9);
}
