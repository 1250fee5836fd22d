use std::sync::Arc;
use std::thread;

use weedcnn::model::{MapDims, Stage};
use weedcnn::ops::sigmoid;
use weedcnn::profiling::TimerTree;
use weedcnn::{Cnn, CnnConfig, CnnError, Detection, ForwardState, InMemoryParams, Tensor, WeightSharing};

fn single_stage_config() -> CnnConfig {
    CnnConfig {
        maps: vec![MapDims::new(1, 4, 4), MapDims::new(1, 4, 4)],
        stages: vec![Stage::conv((3, 3), (1, 1))],
        final_pool: (2, 2),
        dense: vec![3],
        padding: true,
    }
}

/// Identity convolution followed by a dense layer that picks pooled cells 0, 1 and 3.
fn identity_params(config: &CnnConfig) -> InMemoryParams {
    let mut params = InMemoryParams::zeros(config);
    params.conv_weights[0][0][0][1][1] = 1.0;
    params.dense_weights[0][0][0] = 1.0;
    params.dense_weights[0][1][1] = 1.0;
    params.dense_weights[0][2][3] = 1.0;
    params
}

fn ramp_frame() -> Tensor {
    Tensor::from_vec(vec![1, 4, 4], (1..=16).map(|v| v as f32).collect()).expect("frame")
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn identity_network() -> Cnn {
    init_tracing();
    let config = single_stage_config();
    let params = identity_params(&config);
    Cnn::new(config, &params).expect("network")
}

#[test]
fn identity_network_reports_pooled_maxima() {
    let mut cnn = identity_network();
    let frame = ramp_frame();
    let detection = cnn.forward(&frame).expect("forward");
    assert_eq!(
        detection,
        Detection {
            x: 6.0,
            y: 8.0,
            probability: sigmoid(16.0)
        }
    );
    assert!(detection.has_weed(0.5));
    assert_eq!(cnn.final_pool_indices(), &[5, 7, 13, 15]);
    assert_eq!(
        cnn.dense_activations()[0].to_vec().expect("pooled"),
        vec![6.0, 8.0, 14.0, 16.0]
    );
    assert_eq!(
        frame.to_vec().expect("frame"),
        (1..=16).map(|v| v as f32).collect::<Vec<_>>()
    );
    assert_eq!(cnn.state(), ForwardState::Complete);
}

#[test]
fn repeated_calls_are_deterministic() {
    let mut cnn = identity_network();
    let first = cnn.forward(&ramp_frame()).expect("first");
    let second = cnn.forward(&ramp_frame()).expect("second");
    assert_eq!(first, second);
}

#[test]
fn reset_clears_every_buffer() {
    let mut cnn = identity_network();
    cnn.forward(&ramp_frame()).expect("forward");
    cnn.reset().expect("reset");
    for map in cnn.maps() {
        assert!(map.to_vec().expect("map").iter().all(|v| *v == 0.0));
    }
    for activation in cnn.dense_activations() {
        assert!(activation.to_vec().expect("activation").iter().all(|v| *v == 0.0));
    }
    assert!(cnn.final_pool_indices().iter().all(|i| *i == 0));
}

#[test]
fn derived_networks_share_or_copy_weights() {
    let mut master = identity_network();
    let mut shared = master.derive(WeightSharing::Shared).expect("shared");
    let mut deep = master.derive(WeightSharing::Deep).expect("deep");

    let master_kernels = master.conv_kernels(0).expect("master kernels");
    assert!(Tensor::shares_storage(
        master_kernels,
        shared.conv_kernels(0).expect("shared kernels")
    ));
    assert!(!Tensor::shares_storage(
        master_kernels,
        deep.conv_kernels(0).expect("deep kernels")
    ));
    assert!(Tensor::shares_storage(
        master.dense_layers()[0].weight(),
        shared.dense_layers()[0].weight()
    ));
    assert!(!Tensor::shares_storage(&master.maps()[0], &shared.maps()[0]));

    let expected = master.forward(&ramp_frame()).expect("master");
    assert_eq!(shared.forward(&ramp_frame()).expect("shared forward"), expected);
    assert_eq!(deep.forward(&ramp_frame()).expect("deep forward"), expected);
}

#[test]
fn timer_hook_records_every_stage() {
    let mut cnn = identity_network();
    let timers = Arc::new(TimerTree::new());
    cnn.set_hook(timers.clone());
    cnn.forward(&ramp_frame()).expect("first");
    cnn.forward(&ramp_frame()).expect("second");

    let rows = timers.rows();
    let paths: Vec<&str> = rows.iter().map(|row| row.path.as_str()).collect();
    assert_eq!(
        paths,
        vec![
            "forward",
            "forward/reset",
            "forward/parse",
            "forward/normalize",
            "forward/conv[0]",
            "forward/final_pool",
            "forward/dense[0]",
            "forward/output",
        ]
    );
    assert!(rows.iter().all(|row| row.calls == 2));
    let conv = rows
        .iter()
        .find(|row| row.name == "conv[0]")
        .expect("conv row");
    assert_eq!(conv.note.as_deref(), Some("unrolled 3x3"));
    assert!(timers.report().contains("final_pool"));
}

#[test]
fn a_zero_frame_after_a_busy_frame_matches_a_fresh_zero_frame() {
    let zero = Tensor::zeros(vec![1, 4, 4]).expect("zero frame");
    let baseline = identity_network().forward(&zero).expect("fresh zero forward");

    let mut cnn = identity_network();
    let busy = cnn.forward(&ramp_frame()).expect("busy forward");
    assert_ne!(busy, baseline);
    let after = cnn.forward(&zero).expect("zero forward after busy frame");
    assert_eq!(after, baseline);
    assert_eq!(
        after,
        Detection {
            x: 0.0,
            y: 0.0,
            probability: 0.5
        }
    );
    assert!(cnn.maps()[1].to_vec().expect("conv map").iter().all(|v| *v == 0.0));
}

#[test]
fn derived_networks_share_one_timer_across_threads() {
    const THREADS: u64 = 4;
    const CALLS: u64 = 250;
    let mut master = identity_network();
    let timers = Arc::new(TimerTree::new());
    master.set_hook(timers.clone());
    let expected = master.forward(&ramp_frame()).expect("master forward");

    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let mut derived = master.derive(WeightSharing::Shared).expect("derived network");
            thread::spawn(move || {
                let frame = ramp_frame();
                for _ in 0..CALLS {
                    let detection = derived.forward(&frame).expect("derived forward");
                    assert_eq!(detection, expected);
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker thread");
    }

    let rows = timers.rows();
    let paths: Vec<&str> = rows.iter().map(|row| row.path.as_str()).collect();
    assert_eq!(
        paths,
        vec![
            "forward",
            "forward/reset",
            "forward/parse",
            "forward/normalize",
            "forward/conv[0]",
            "forward/final_pool",
            "forward/dense[0]",
            "forward/output",
        ]
    );
    assert!(rows.iter().all(|row| row.calls == THREADS * CALLS + 1));
}

#[test]
fn pooling_stages_capture_indices() {
    let config = CnnConfig {
        maps: vec![
            MapDims::new(1, 4, 4),
            MapDims::new(1, 4, 4),
            MapDims::new(1, 2, 2),
        ],
        stages: vec![Stage::conv((3, 3), (1, 1)), Stage::pool((2, 2))],
        final_pool: (1, 1),
        dense: vec![3],
        padding: true,
    };
    let mut params = InMemoryParams::zeros(&config);
    params.conv_weights[0][0][0][1][1] = 1.0;
    params.dense_weights[0][0][0] = 1.0;
    params.dense_weights[0][1][1] = 1.0;
    params.dense_weights[0][2][3] = 1.0;
    let mut cnn = Cnn::new(config, &params).expect("network");
    let detection = cnn.forward(&ramp_frame()).expect("forward");
    assert_eq!((detection.x, detection.y), (6.0, 8.0));
    assert_eq!(cnn.pool_indices(1), Some(&[5, 7, 13, 15][..]));
    assert_eq!(cnn.final_pool_indices(), &[0, 1, 2, 3]);
}

#[test]
fn hidden_layers_apply_leaky_relu() {
    let config = CnnConfig {
        dense: vec![2, 3],
        ..single_stage_config()
    };
    let mut params = InMemoryParams::zeros(&config);
    params.conv_weights[0][0][0][1][1] = 1.0;
    // hidden[0] = cell 0, hidden[1] = -cell 3
    params.dense_weights[0][0][0] = 1.0;
    params.dense_weights[0][1][3] = -1.0;
    params.dense_weights[1][0][0] = 1.0;
    params.dense_weights[1][1][1] = 1.0;
    let mut cnn = Cnn::new(config, &params).expect("network");
    let detection = cnn.forward(&ramp_frame()).expect("forward");
    assert_eq!(detection.x, 6.0);
    assert!((detection.y - (-0.16)).abs() < 1e-6, "y = {}", detection.y);
    assert_eq!(detection.probability, 0.5);
}

#[test]
fn larger_frames_are_resized_to_the_input_map() {
    let mut cnn = identity_network();
    let mut frame = Tensor::zeros(vec![1, 8, 8]).expect("frame");
    frame.fill(1.0).expect("fill");
    cnn.forward(&frame).expect("forward");
    assert_eq!(cnn.maps()[0].dims(), &[1, 4, 4]);
    assert!(cnn.maps()[0].get(&[0, 1, 1]).expect("read") > 0.0);
    assert!(frame.to_vec().expect("frame").iter().all(|v| *v == 1.0));
}

#[test]
fn default_topology_runs_on_zero_weights() {
    let config = CnnConfig::default();
    let input = config.input().expect("input map");
    let mut cnn = Cnn::new(config.clone(), &InMemoryParams::zeros(&config)).expect("network");
    let frame = Tensor::zeros(input.dims().to_vec()).expect("frame");
    let detection = cnn.forward(&frame).expect("forward");
    assert_eq!(
        detection,
        Detection {
            x: 0.0,
            y: 0.0,
            probability: 0.5
        }
    );
}

#[test]
fn mismatched_parameters_are_config_errors() {
    let config = single_stage_config();
    let mut params = identity_params(&config);
    params.dense_biases[0].pop();
    assert!(matches!(
        Cnn::new(config, &params),
        Err(CnnError::Config(_))
    ));
}
