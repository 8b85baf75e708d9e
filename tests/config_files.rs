//! Loading run configurations from YAML and JSON files.

mod common;

use common::{CountingExtractor, setup};
use numr::runtime::cpu::CpuRuntime;
use std::io::Write;
use stylr::config::OptimizerKind;
use stylr::encoder::Encoder;
use stylr::pyramid::StepSchedule;
use stylr::{Edge, Error, ExecutionContext, LayerWeighting, StyleTransferConfig};

fn write_temp(suffix: &str, content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_yaml_file() {
    let file = write_temp(
        ".yaml",
        r#"
content_layer: relu_2_1
content_weight: 2.0
style_layers: [relu1_1, relu2_1]
style_weight: 500.0
style_weighting: sum
tv_weight: 0.1
optimizer:
  kind: sgd
  lr: 0.5
max_steps: 120
tolerance: 0.0001
pyramid:
  edge_sizes: [128, 256]
  num_steps: [80, 40]
  edge: long
"#,
    );
    let config = StyleTransferConfig::load_yaml(file.path()).unwrap();
    assert_eq!(config.content_layer_name(), "relu2_1");
    assert_eq!(config.style_weighting, LayerWeighting::Sum);
    assert_eq!(config.optimizer.kind, OptimizerKind::Sgd);
    assert_eq!(config.tolerance, Some(1e-4));
    let pyramid = config.pyramid.as_ref().unwrap();
    assert_eq!(pyramid.num_steps, StepSchedule::PerLevel(vec![80, 40]));
    assert_eq!(pyramid.edge, Edge::Long);

    let (_client, device) = setup();
    let encoder = Encoder::<CpuRuntime>::new(
        ExecutionContext::f32(device),
        Box::new(CountingExtractor::new(&["relu1_1", "relu2_1"])),
    );
    let objective = config.build_loss(encoder).unwrap();
    assert_eq!(objective.weight("style.relu2_1"), Some(500.0));
    assert_eq!(objective.weight("content"), Some(2.0));
}

#[test]
fn test_json_round_trip_through_file() {
    let config = StyleTransferConfig {
        style_layers: vec!["relu1_1".into()],
        max_steps: 10,
        ..Default::default()
    };
    let file = write_temp(".json", &config.to_json().unwrap());
    let loaded = StyleTransferConfig::load_json(file.path()).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_invalid_files_are_configuration_errors() {
    let bad_values = write_temp(".yaml", "style_weight: -3.0\n");
    assert!(matches!(
        StyleTransferConfig::load_yaml(bad_values.path()),
        Err(Error::Configuration { .. })
    ));

    let bad_syntax = write_temp(".json", "{ \"max_steps\": ");
    assert!(matches!(
        StyleTransferConfig::load_json(bad_syntax.path()),
        Err(Error::Configuration { .. })
    ));

    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        StyleTransferConfig::load_yaml(dir.path().join("missing.yaml")),
        Err(Error::Configuration { .. })
    ));
}
