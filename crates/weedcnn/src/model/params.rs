//! Parameter sources and their validation against a topology.

use anyhow::Result;

use crate::error::{CnnError, CnnResult};
use crate::model::config::CnnConfig;
use crate::ops::linear::Dense;
use crate::tensor::{Nested2, Nested3, Nested5, Tensor};

/// Supplies the five parameter datasets a network is built from.
///
/// Shapes: conv weights `[stage][out_c][in_c][kH][kW]` (conv stages only), conv biases
/// `[stage][out_c]`, dense weights `[layer][out][in]`, dense biases `[layer][out]`, pixel stats
/// `[[means...], [std_devs...]]`.
pub trait ParamSource {
    fn conv_weights(&self) -> Result<Nested5>;
    fn conv_biases(&self) -> Result<Nested2>;
    fn dense_weights(&self) -> Result<Nested3>;
    fn dense_biases(&self) -> Result<Nested2>;
    fn pixel_stats(&self) -> Result<Nested2>;
}

/// Parameters held directly in memory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InMemoryParams {
    pub conv_weights: Nested5,
    pub conv_biases: Nested2,
    pub dense_weights: Nested3,
    pub dense_biases: Nested2,
    pub pixel_stats: Nested2,
}

impl InMemoryParams {
    /// All-zero weights shaped for `config`, with identity pixel statistics.
    pub fn zeros(config: &CnnConfig) -> Self {
        let mut params = InMemoryParams::default();
        for (index, stage) in config.stages.iter().enumerate() {
            if stage.is_pool() {
                continue;
            }
            let (input, output) = (config.maps[index], config.maps[index + 1]);
            let (kh, kw) = stage.kernel;
            params
                .conv_weights
                .push(vec![vec![vec![vec![0.0; kw]; kh]; input.channels]; output.channels]);
            params.conv_biases.push(vec![0.0; output.channels]);
        }
        let mut width = config.dense_inputs();
        for &neurons in &config.dense {
            params.dense_weights.push(vec![vec![0.0; width]; neurons]);
            params.dense_biases.push(vec![0.0; neurons]);
            width = neurons;
        }
        let channels = config.input().map_or(0, |map| map.channels);
        params.pixel_stats = vec![vec![0.0; channels], vec![1.0; channels]];
        params
    }
}

impl ParamSource for InMemoryParams {
    fn conv_weights(&self) -> Result<Nested5> {
        Ok(self.conv_weights.clone())
    }

    fn conv_biases(&self) -> Result<Nested2> {
        Ok(self.conv_biases.clone())
    }

    fn dense_weights(&self) -> Result<Nested3> {
        Ok(self.dense_weights.clone())
    }

    fn dense_biases(&self) -> Result<Nested2> {
        Ok(self.dense_biases.clone())
    }

    fn pixel_stats(&self) -> Result<Nested2> {
        Ok(self.pixel_stats.clone())
    }
}

/// Per-channel input standardisation.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelStats {
    pub means: Vec<f32>,
    pub std_devs: Vec<f32>,
}

/// Tensors built from a [`ParamSource`] and checked against a topology.
#[derive(Debug, Clone)]
pub(crate) struct LoadedParams {
    /// One `[out_c, in_c, kH, kW]` tensor with an `[out_c]` bias per conv stage.
    pub conv: Vec<Tensor>,
    pub dense: Vec<Dense>,
    pub stats: PixelStats,
}

fn fetch<T>(what: &str, result: Result<T>) -> CnnResult<T> {
    result.map_err(|err| CnnError::Params(err.context(format!("reading {what}"))))
}

fn weight_tensor<N: crate::tensor::Nested>(
    values: &N,
    bias: &[f32],
    expected: &[usize],
    label: &str,
) -> CnnResult<Tensor> {
    let mut tensor = Tensor::from_nested(values)
        .map_err(|err| CnnError::config(format!("{label} weights: {err}")))?;
    if tensor.dims() != expected {
        return Err(CnnError::config(format!(
            "{label} weights have shape {:?}, expected {expected:?}",
            tensor.dims()
        )));
    }
    if bias.len() != expected[0] {
        return Err(CnnError::config(format!(
            "{label} has {} biases, expected {}",
            bias.len(),
            expected[0]
        )));
    }
    tensor.set_bias(&Tensor::from_vec(vec![bias.len()], bias.to_vec())?)?;
    Ok(tensor)
}

pub(crate) fn load(config: &CnnConfig, source: &(impl ParamSource + ?Sized)) -> CnnResult<LoadedParams> {
    let conv_weights = fetch("conv weights", source.conv_weights())?;
    let conv_biases = fetch("conv biases", source.conv_biases())?;
    let conv_stages = config.conv_stage_count();
    if conv_weights.len() != conv_stages || conv_biases.len() != conv_stages {
        return Err(CnnError::config(format!(
            "{conv_stages} conv stages but {} kernel sets and {} bias sets",
            conv_weights.len(),
            conv_biases.len()
        )));
    }
    let mut conv = Vec::with_capacity(conv_stages);
    let conv_indices = config
        .stages
        .iter()
        .enumerate()
        .filter(|(_, stage)| !stage.is_pool())
        .map(|(index, _)| index);
    for (layer, index) in conv_indices.enumerate() {
        let (input, output) = (config.maps[index], config.maps[index + 1]);
        let (kh, kw) = config.stages[index].kernel;
        let expected = [output.channels, input.channels, kh, kw];
        conv.push(weight_tensor(
            &conv_weights[layer],
            &conv_biases[layer],
            &expected,
            &format!("conv stage {index}"),
        )?);
    }

    let dense_weights = fetch("dense weights", source.dense_weights())?;
    let dense_biases = fetch("dense biases", source.dense_biases())?;
    if dense_weights.len() != config.dense.len() || dense_biases.len() != config.dense.len() {
        return Err(CnnError::config(format!(
            "{} dense layers but {} weight sets and {} bias sets",
            config.dense.len(),
            dense_weights.len(),
            dense_biases.len()
        )));
    }
    let mut dense = Vec::with_capacity(config.dense.len());
    let mut width = config.dense_inputs();
    for (layer, &neurons) in config.dense.iter().enumerate() {
        let weight = weight_tensor(
            &dense_weights[layer],
            &dense_biases[layer],
            &[neurons, width],
            &format!("dense layer {layer}"),
        )?;
        dense.push(Dense::new(weight)?);
        width = neurons;
    }

    let stats = fetch("pixel stats", source.pixel_stats())?;
    let channels = config.input().map_or(0, |map| map.channels);
    let [means, std_devs] = match stats.as_slice() {
        [means, std_devs] => [means.clone(), std_devs.clone()],
        _ => {
            return Err(CnnError::config(format!(
                "pixel stats need 2 rows (means, std devs), found {}",
                stats.len()
            )))
        }
    };
    if means.len() != channels || std_devs.len() != channels {
        return Err(CnnError::config(format!(
            "pixel stats cover {} / {} channels, input has {channels}",
            means.len(),
            std_devs.len()
        )));
    }
    if let Some(bad) = std_devs.iter().find(|s| !(s.is_finite() && **s > 0.0)) {
        return Err(CnnError::config(format!(
            "pixel standard deviations must be positive, found {bad}"
        )));
    }

    Ok(LoadedParams {
        conv,
        dense,
        stats: PixelStats { means, std_devs },
    })
}
