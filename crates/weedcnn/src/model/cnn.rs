use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::config::CnnConfig;
use super::params::{self, LoadedParams, ParamSource, PixelStats};
use crate::env;
use crate::error::{CnnError, CnnResult};
use crate::ops::activation::sigmoid;
use crate::ops::conv::{convolve_into_with_path, pad_into, padded_dims, ConvPath};
use crate::ops::image::{normalize, resize_into};
use crate::ops::linear::Dense;
use crate::ops::pooling::max_pool_into;
use crate::profiling::{stage_scope, NoopHook, ScopeGuard, StageHook, TimerTree};
use crate::tensor::Tensor;

/// Network output for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Raw regression output for the weed's horizontal position.
    pub x: f32,
    /// Raw regression output for the weed's vertical position.
    pub y: f32,
    /// Sigmoid of the weed logit, in `[0, 1]`.
    pub probability: f32,
}

impl Detection {
    pub fn has_weed(&self, threshold: f32) -> bool {
        self.probability >= threshold
    }
}

/// Outcome of the most recent [`Cnn::forward`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ForwardState {
    Uninitialized,
    Complete,
    Failed,
}

/// Pipeline steps reported to the stage hook, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineStage {
    Reset,
    Parse,
    Normalize,
    Convolution { stage: usize },
    Pooling { stage: usize },
    FinalPool,
    Dense { layer: usize },
    Output,
}

impl PipelineStage {
    /// Name of a stage that carries no index.
    fn fixed_label(self) -> Option<&'static str> {
        match self {
            PipelineStage::Reset => Some("reset"),
            PipelineStage::Parse => Some("parse"),
            PipelineStage::Normalize => Some("normalize"),
            PipelineStage::FinalPool => Some("final_pool"),
            PipelineStage::Output => Some("output"),
            PipelineStage::Convolution { .. }
            | PipelineStage::Pooling { .. }
            | PipelineStage::Dense { .. } => None,
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(label) = self.fixed_label() {
            return f.write_str(label);
        }
        match self {
            PipelineStage::Convolution { stage } => write!(f, "conv[{stage}]"),
            PipelineStage::Pooling { stage } => write!(f, "pool[{stage}]"),
            PipelineStage::Dense { layer } => write!(f, "dense[{layer}]"),
            _ => Ok(()),
        }
    }
}

/// Hook names of the indexed stages, rendered once per topology so a forward pass never formats.
#[derive(Debug)]
struct StageLabels {
    stages: Vec<String>,
    dense: Vec<String>,
}

impl StageLabels {
    fn new(config: &CnnConfig) -> Self {
        let stages = config
            .stages
            .iter()
            .enumerate()
            .map(|(stage, kind)| {
                if kind.is_pool() {
                    PipelineStage::Pooling { stage }.to_string()
                } else {
                    PipelineStage::Convolution { stage }.to_string()
                }
            })
            .collect();
        let dense = (0..config.dense.len())
            .map(|layer| PipelineStage::Dense { layer }.to_string())
            .collect();
        Self { stages, dense }
    }

    fn get(&self, stage: PipelineStage) -> &str {
        if let Some(label) = stage.fixed_label() {
            return label;
        }
        match stage {
            PipelineStage::Convolution { stage } | PipelineStage::Pooling { stage } => {
                self.stages.get(stage).map_or("stage", String::as_str)
            }
            PipelineStage::Dense { layer } => self.dense.get(layer).map_or("dense", String::as_str),
            _ => "stage",
        }
    }
}

/// How [`Cnn::derive`] treats the master's weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WeightSharing {
    /// Alias the master's weight buffers.
    Shared,
    /// Give the derived network its own copy.
    Deep,
}

#[derive(Debug, Clone)]
enum StageState {
    Conv {
        /// `[out_c, in_c, kH, kW]` with an `[out_c]` bias.
        kernels: Tensor,
        /// Per-output-channel views of `kernels`, each carrying its scalar bias.
        channel_kernels: Vec<Tensor>,
        /// Zero-bordered copy of the input map; absent when the topology does not pad.
        padded: Option<Tensor>,
        path: ConvPath,
    },
    Pool {
        indices: Vec<usize>,
    },
}

/// Fixed-topology convolutional network.
///
/// All feature maps, activations and scratch buffers are allocated once at construction and
/// reused by every [`Cnn::forward`] call.
pub struct Cnn {
    config: CnnConfig,
    stages: Vec<StageState>,
    dense: Vec<Dense>,
    stats: PixelStats,
    maps: Vec<Tensor>,
    /// Per-channel `[H, W]` views of every map.
    planes: Vec<Vec<Tensor>>,
    activations: Vec<Tensor>,
    /// Per-channel views of dense activation 0, shaped like the pooled last map.
    pooled_planes: Vec<Tensor>,
    final_indices: Vec<usize>,
    state: ForwardState,
    labels: Arc<StageLabels>,
    hook: Arc<dyn StageHook>,
    timers: Option<Arc<TimerTree>>,
}

impl fmt::Debug for Cnn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cnn")
            .field("config", &self.config)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl Cnn {
    /// Validates `config`, loads parameters from `source`, and allocates every buffer.
    ///
    /// Installs a [`TimerTree`] hook when `WEEDCNN_PROFILE` is truthy.
    pub fn new(config: CnnConfig, source: &(impl ParamSource + ?Sized)) -> CnnResult<Self> {
        config.validate()?;
        let loaded = params::load(&config, source)?;
        let mut cnn = Self::assemble(config, loaded)?;
        if env::profile_enabled() {
            let timers = Arc::new(TimerTree::new());
            cnn.hook = timers.clone();
            cnn.timers = Some(timers);
        }
        debug!(
            maps = cnn.maps.len(),
            conv_stages = cnn.config.conv_stage_count(),
            dense_layers = cnn.dense.len(),
            dense_inputs = cnn.config.dense_inputs(),
            "constructed CNN"
        );
        Ok(cnn)
    }

    /// Builds a network with the same topology and statistics, either aliasing or copying the
    /// weights. Maps and scratch buffers are always fresh.
    pub fn derive(&self, sharing: WeightSharing) -> CnnResult<Self> {
        let mut conv = Vec::with_capacity(self.stages.len());
        for stage in &self.stages {
            if let StageState::Conv { kernels, .. } = stage {
                conv.push(match sharing {
                    WeightSharing::Shared => kernels.clone(),
                    WeightSharing::Deep => kernels.deep_copy()?,
                });
            }
        }
        let dense = match sharing {
            WeightSharing::Shared => self.dense.clone(),
            WeightSharing::Deep => self
                .dense
                .iter()
                .map(|layer| Dense::new(layer.weight().deep_copy()?))
                .collect::<Result<Vec<_>, _>>()?,
        };
        let loaded = LoadedParams {
            conv,
            dense,
            stats: self.stats.clone(),
        };
        let mut derived = Self::assemble(self.config.clone(), loaded)?;
        derived.hook = Arc::clone(&self.hook);
        derived.timers = self.timers.clone();
        debug!(?sharing, "derived CNN");
        Ok(derived)
    }

    fn assemble(config: CnnConfig, loaded: LoadedParams) -> CnnResult<Self> {
        let LoadedParams { conv, dense, stats } = loaded;
        let maps = config
            .maps
            .iter()
            .map(|map| Tensor::zeros(map.dims().to_vec()))
            .collect::<Result<Vec<_>, _>>()?;
        let planes = maps
            .iter()
            .map(|map| (0..map.dims()[0]).map(|c| map.slice(&[c])).collect())
            .collect::<Result<Vec<Vec<_>>, _>>()?;

        let mut conv = conv.into_iter();
        let mut stages = Vec::with_capacity(config.stages.len());
        for (index, stage) in config.stages.iter().enumerate() {
            if stage.is_pool() {
                let out = config.maps[index + 1];
                stages.push(StageState::Pool {
                    indices: vec![0; out.num_elements()],
                });
                continue;
            }
            let kernels = conv
                .next()
                .ok_or_else(|| CnnError::config(format!("missing kernels for stage {index}")))?;
            let channel_kernels = (0..kernels.dims()[0])
                .map(|o| kernels.slice_with_bias(&[o], &[o]))
                .collect::<Result<Vec<_>, _>>()?;
            let (kh, kw) = stage.kernel;
            let padded = if config.padding {
                Some(Tensor::zeros(padded_dims(maps[index].dims(), kh, kw)?)?)
            } else {
                None
            };
            stages.push(StageState::Conv {
                kernels,
                channel_kernels,
                padded,
                path: ConvPath::select(kh, kw),
            });
        }

        let pooled_dims = config
            .final_pool_dims()
            .ok_or_else(|| CnnError::config("topology has no maps"))?;
        let mut activations = Vec::with_capacity(config.dense.len() + 1);
        activations.push(Tensor::zeros(vec![config.dense_inputs()])?);
        for &neurons in &config.dense {
            activations.push(Tensor::zeros(vec![neurons])?);
        }
        let pooled = activations[0].reshape(pooled_dims.to_vec())?;
        let pooled_planes = (0..pooled_dims[0])
            .map(|c| pooled.slice(&[c]))
            .collect::<Result<Vec<_>, _>>()?;
        let final_indices = vec![0; config.dense_inputs()];
        let labels = Arc::new(StageLabels::new(&config));

        Ok(Self {
            config,
            stages,
            dense,
            stats,
            maps,
            planes,
            activations,
            pooled_planes,
            final_indices,
            state: ForwardState::Uninitialized,
            labels,
            hook: Arc::new(NoopHook),
            timers: None,
        })
    }

    pub fn config(&self) -> &CnnConfig {
        &self.config
    }

    pub fn state(&self) -> ForwardState {
        self.state
    }

    /// Input map followed by every stage output, as left by the last call.
    pub fn maps(&self) -> &[Tensor] {
        &self.maps
    }

    /// Dense input vector followed by every dense layer output.
    pub fn dense_activations(&self) -> &[Tensor] {
        &self.activations
    }

    pub fn dense_layers(&self) -> &[Dense] {
        &self.dense
    }

    /// Full kernel tensor of a conv stage.
    pub fn conv_kernels(&self, stage: usize) -> Option<&Tensor> {
        match self.stages.get(stage)? {
            StageState::Conv { kernels, .. } => Some(kernels),
            StageState::Pool { .. } => None,
        }
    }

    /// Arg-max positions captured by a pooling stage, channel-major; each entry is a flat index
    /// into that channel's `[H, W]` input plane.
    pub fn pool_indices(&self, stage: usize) -> Option<&[usize]> {
        match self.stages.get(stage)? {
            StageState::Pool { indices } => Some(indices),
            StageState::Conv { .. } => None,
        }
    }

    /// Arg-max positions captured by the final pooling, channel-major.
    pub fn final_pool_indices(&self) -> &[usize] {
        &self.final_indices
    }

    pub fn set_hook(&mut self, hook: Arc<dyn StageHook>) {
        self.hook = hook;
        self.timers = None;
    }

    pub fn hook(&self) -> &Arc<dyn StageHook> {
        &self.hook
    }

    /// The timer installed by `WEEDCNN_PROFILE`, if any.
    pub fn timers(&self) -> Option<&TimerTree> {
        self.timers.as_deref()
    }

    /// Runs one frame through the network.
    ///
    /// `input` is `[C, H, W]` raw pixels with `C` equal to the input map's channel count; other
    /// spatial sizes are blurred down to the input map. The input is never modified.
    pub fn forward(&mut self, input: &Tensor) -> CnnResult<Detection> {
        let result = self.run(input);
        self.state = if result.is_ok() {
            ForwardState::Complete
        } else {
            ForwardState::Failed
        };
        result
    }

    /// Zeroes every map, activation and index buffer.
    pub fn reset(&mut self) -> CnnResult<()> {
        for map in &mut self.maps {
            map.zero()?;
        }
        for activation in &mut self.activations {
            activation.zero()?;
        }
        for stage in &mut self.stages {
            if let StageState::Pool { indices } = stage {
                indices.fill(0);
            }
        }
        self.final_indices.fill(0);
        Ok(())
    }

    fn run(&mut self, input: &Tensor) -> CnnResult<Detection> {
        let hook = Arc::clone(&self.hook);
        let labels = Arc::clone(&self.labels);
        let (hook, labels) = (hook.as_ref(), labels.as_ref());
        let _forward = stage_scope(hook, "forward");

        {
            let _stage = enter(hook, labels, PipelineStage::Reset);
            self.reset()?;
        }
        {
            let _stage = enter(hook, labels, PipelineStage::Parse);
            resize_into(input, &mut self.maps[0])?;
        }
        {
            let _stage = enter(hook, labels, PipelineStage::Normalize);
            normalize(&mut self.maps[0], &self.stats.means, &self.stats.std_devs)?;
        }

        for index in 0..self.stages.len() {
            let (sy, sx) = self.config.stages[index].stride;
            let (before, after) = self.planes.split_at_mut(index + 1);
            let (inputs, outputs) = (&before[index], &mut after[0]);
            match &mut self.stages[index] {
                StageState::Conv {
                    channel_kernels,
                    padded,
                    path,
                    ..
                } => {
                    let _stage = enter(hook, labels, PipelineStage::Convolution { stage: index });
                    hook.note(path_label(*path));
                    let image = match padded {
                        Some(scratch) => {
                            pad_into(&self.maps[index], scratch)?;
                            &*scratch
                        }
                        None => &self.maps[index],
                    };
                    for (kernel, out) in channel_kernels.iter().zip(outputs.iter_mut()) {
                        convolve_into_with_path(image, kernel, sx, sy, out, *path)?;
                    }
                }
                StageState::Pool { indices } => {
                    let _stage = enter(hook, labels, PipelineStage::Pooling { stage: index });
                    let cells = self.config.maps[index + 1].height * self.config.maps[index + 1].width;
                    for ((map, out), captured) in inputs
                        .iter()
                        .zip(outputs.iter_mut())
                        .zip(indices.chunks_exact_mut(cells))
                    {
                        max_pool_into(map, sx, sy, out, Some(captured))?;
                    }
                }
            }
        }

        {
            let _stage = enter(hook, labels, PipelineStage::FinalPool);
            let (sy, sx) = self.config.final_pool;
            let last = self.planes.last().map_or(&[][..], Vec::as_slice);
            let cells = self.final_indices.len() / self.pooled_planes.len().max(1);
            for ((map, out), captured) in last
                .iter()
                .zip(self.pooled_planes.iter_mut())
                .zip(self.final_indices.chunks_exact_mut(cells))
            {
                max_pool_into(map, sx, sy, out, Some(captured))?;
            }
        }

        let last_layer = self.dense.len() - 1;
        for (layer, dense) in self.dense.iter().enumerate() {
            let _stage = enter(hook, labels, PipelineStage::Dense { layer });
            let (inputs, outputs) = self.activations.split_at_mut(layer + 1);
            dense.forward_into(&inputs[layer], &mut outputs[0], layer != last_layer)?;
        }

        let _stage = enter(hook, labels, PipelineStage::Output);
        let Some(output) = self.activations.last_mut() else {
            return Err(CnnError::config("network has no dense layers"));
        };
        let probability = sigmoid(output.get_flat(2)?);
        output.set_flat(2, probability)?;
        let detection = Detection {
            x: output.get_flat(0)?,
            y: output.get_flat(1)?,
            probability,
        };
        debug!(
            x = detection.x,
            y = detection.y,
            probability = detection.probability,
            "forward pass complete"
        );
        Ok(detection)
    }
}

fn enter<'a>(hook: &'a dyn StageHook, labels: &'a StageLabels, stage: PipelineStage) -> ScopeGuard<'a> {
    trace!(%stage, "pipeline stage");
    stage_scope(hook, labels.get(stage))
}

fn path_label(path: ConvPath) -> &'static str {
    match path {
        ConvPath::Unrolled3x3 => "unrolled 3x3",
        ConvPath::WideRow => "wide row",
        ConvPath::Generic => "generic",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::config::{MapDims, Stage};
    use crate::model::params::InMemoryParams;

    fn pooled_config() -> CnnConfig {
        CnnConfig {
            maps: vec![
                MapDims::new(1, 4, 4),
                MapDims::new(2, 4, 4),
                MapDims::new(2, 2, 2),
            ],
            stages: vec![Stage::conv((3, 3), (1, 1)), Stage::pool((2, 2))],
            final_pool: (1, 1),
            dense: vec![3],
            padding: true,
        }
    }

    #[test]
    fn zero_network_reports_even_odds() {
        let config = pooled_config();
        let mut cnn = Cnn::new(config.clone(), &InMemoryParams::zeros(&config)).expect("network");
        assert_eq!(cnn.state(), ForwardState::Uninitialized);
        let input = Tensor::zeros(vec![1, 4, 4]).expect("zeroed tensor");
        let detection = cnn.forward(&input).expect("forward");
        assert_eq!(
            detection,
            Detection {
                x: 0.0,
                y: 0.0,
                probability: 0.5
            }
        );
        assert_eq!(cnn.state(), ForwardState::Complete);
        assert_eq!(cnn.pool_indices(1).map(<[usize]>::len), Some(8));
        assert!(cnn.pool_indices(0).is_none());
    }

    #[test]
    fn wrong_input_channels_fail_the_call() {
        let config = pooled_config();
        let mut cnn = Cnn::new(config.clone(), &InMemoryParams::zeros(&config)).expect("network");
        let input = Tensor::zeros(vec![3, 4, 4]).expect("zeroed tensor");
        assert!(cnn.forward(&input).is_err());
        assert_eq!(cnn.state(), ForwardState::Failed);
    }

    #[test]
    fn stage_names_render() {
        assert_eq!(PipelineStage::Convolution { stage: 2 }.to_string(), "conv[2]");
        assert_eq!(PipelineStage::FinalPool.to_string(), "final_pool");
    }

    #[test]
    fn labels_match_the_rendered_stage_names() {
        let labels = StageLabels::new(&pooled_config());
        for stage in [
            PipelineStage::Reset,
            PipelineStage::Convolution { stage: 0 },
            PipelineStage::Pooling { stage: 1 },
            PipelineStage::FinalPool,
            PipelineStage::Dense { layer: 0 },
            PipelineStage::Output,
        ] {
            assert_eq!(labels.get(stage), stage.to_string());
        }
    }
}
