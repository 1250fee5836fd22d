use std::fs;

use weedcnn::io::json_params::{DENSE_WEIGHTS_FILE, PIXEL_STATS_FILE};
use weedcnn::io::{load_config, JsonParamDir};
use weedcnn::model::{MapDims, Stage};
use weedcnn::{Cnn, CnnConfig, CnnError, InMemoryParams, Tensor};

fn small_config() -> CnnConfig {
    CnnConfig {
        maps: vec![MapDims::new(1, 4, 4), MapDims::new(2, 4, 4)],
        stages: vec![Stage::conv((3, 3), (1, 1))],
        final_pool: (2, 2),
        dense: vec![3],
        padding: true,
    }
}

#[test]
fn saved_parameters_load_back_into_a_network() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = small_config();
    let mut params = InMemoryParams::zeros(&config);
    params.conv_weights[0][1][0][1][1] = 2.0;
    params.dense_biases[0] = vec![0.5, -0.5, 0.0];
    params.pixel_stats = vec![vec![1.0], vec![2.0]];

    let store = JsonParamDir::new(dir.path().join("params"));
    store.save(&params).expect("save");
    assert_eq!(store.load_all().expect("reload"), params);

    let mut from_disk = Cnn::new(config.clone(), &store).expect("network from disk");
    let mut from_memory = Cnn::new(config, &params).expect("network from memory");
    let frame = Tensor::from_vec(vec![1, 4, 4], (0..16).map(|v| v as f32).collect()).expect("frame");
    assert_eq!(
        from_disk.forward(&frame).expect("disk forward"),
        from_memory.forward(&frame).expect("memory forward")
    );
}

#[test]
fn missing_files_surface_as_parameter_errors() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = small_config();
    let store = JsonParamDir::new(dir.path());
    store.save(&InMemoryParams::zeros(&config)).expect("save");
    fs::remove_file(dir.path().join(DENSE_WEIGHTS_FILE)).expect("remove");

    let err = Cnn::new(config, &store).expect_err("missing dense weights");
    assert!(matches!(err, CnnError::Params(_)), "unexpected error: {err:?}");
    assert!(format!("{:#}", anyhow::Error::new(err)).contains(DENSE_WEIGHTS_FILE));
}

#[test]
fn malformed_files_surface_as_parameter_errors() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = small_config();
    let store = JsonParamDir::new(dir.path());
    store.save(&InMemoryParams::zeros(&config)).expect("save");
    fs::write(dir.path().join(PIXEL_STATS_FILE), "[[0.0], \"oops\"]").expect("corrupt");
    assert!(matches!(
        Cnn::new(config, &store),
        Err(CnnError::Params(_))
    ));
}

#[test]
fn topology_round_trips_through_a_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("topology.json");
    let config = small_config();
    fs::write(&path, serde_json::to_string_pretty(&config).expect("encode")).expect("write");
    assert_eq!(load_config(&path).expect("load"), config);
    assert!(load_config(dir.path().join("absent.json")).is_err());
}
