use serde::{Deserialize, Serialize};

use crate::error::{CnnError, CnnResult};
use crate::ops::conv::output_extent;
use crate::ops::pooling::pooled_dims;

/// Extents of one feature map, `[channels, height, width]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MapDims {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl MapDims {
    pub const fn new(channels: usize, height: usize, width: usize) -> Self {
        Self {
            channels,
            height,
            width,
        }
    }

    pub fn dims(&self) -> [usize; 3] {
        [self.channels, self.height, self.width]
    }

    pub fn num_elements(&self) -> usize {
        self.channels * self.height * self.width
    }
}

/// One step between consecutive maps. A `(0, 0)` kernel marks a max-pooling stage.
///
/// Both pairs are ordered `(y, x)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stage {
    pub kernel: (usize, usize),
    pub stride: (usize, usize),
}

impl Stage {
    pub const fn conv(kernel: (usize, usize), stride: (usize, usize)) -> Self {
        Self { kernel, stride }
    }

    pub const fn pool(stride: (usize, usize)) -> Self {
        Self {
            kernel: (0, 0),
            stride,
        }
    }

    pub fn is_pool(&self) -> bool {
        self.kernel == (0, 0)
    }
}

fn default_padding() -> bool {
    true
}

/// Fixed network topology. Every buffer the forward pass touches is sized from this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CnnConfig {
    /// Input map followed by the output of every stage.
    pub maps: Vec<MapDims>,
    pub stages: Vec<Stage>,
    /// Pooling stride `(y, x)` applied to the last map before the dense head.
    pub final_pool: (usize, usize),
    /// Output width of every dense layer; the head ends in `[x, y, has_weed]`.
    pub dense: Vec<usize>,
    #[serde(default = "default_padding")]
    pub padding: bool,
}

impl Default for CnnConfig {
    fn default() -> Self {
        Self {
            maps: vec![
                MapDims::new(3, 480, 640),
                MapDims::new(32, 80, 80),
                MapDims::new(32, 40, 40),
                MapDims::new(64, 20, 20),
                MapDims::new(128, 10, 10),
            ],
            stages: vec![
                Stage::conv((7, 9), (6, 8)),
                Stage::conv((3, 3), (2, 2)),
                Stage::conv((3, 3), (2, 2)),
                Stage::conv((3, 3), (2, 2)),
            ],
            final_pool: (2, 2),
            dense: vec![512, 3],
            padding: true,
        }
    }
}

/// Width of the output layer: `x`, `y`, and the weed logit.
pub const OUTPUT_WIDTH: usize = 3;

impl CnnConfig {
    pub fn input(&self) -> Option<MapDims> {
        self.maps.first().copied()
    }

    /// `[channels, height / sy, width / sx]` of the last map after final pooling.
    pub fn final_pool_dims(&self) -> Option<[usize; 3]> {
        let last = self.maps.last()?;
        let [h, w] = pooled_dims(last.height, last.width, self.final_pool.1, self.final_pool.0);
        Some([last.channels, h, w])
    }

    /// Input width of the first dense layer.
    pub fn dense_inputs(&self) -> usize {
        self.final_pool_dims()
            .map_or(0, |dims| dims.iter().product())
    }

    pub fn conv_stage_count(&self) -> usize {
        self.stages.iter().filter(|stage| !stage.is_pool()).count()
    }

    /// Checks that the topology is internally consistent.
    pub fn validate(&self) -> CnnResult<()> {
        if self.maps.is_empty() {
            return Err(CnnError::config("at least one map is required"));
        }
        if self.stages.len() + 1 != self.maps.len() {
            return Err(CnnError::config(format!(
                "{} maps need {} stages, found {}",
                self.maps.len(),
                self.maps.len() - 1,
                self.stages.len()
            )));
        }
        for (index, map) in self.maps.iter().enumerate() {
            if map.channels == 0 || map.height == 0 || map.width == 0 {
                return Err(CnnError::config(format!("map {index} has a zero extent: {map:?}")));
            }
        }
        for (index, stage) in self.stages.iter().enumerate() {
            self.validate_stage(index, stage)?;
        }

        let (sy, sx) = self.final_pool;
        if sy == 0 || sx == 0 {
            return Err(CnnError::config("final pooling strides must be positive"));
        }
        match self.final_pool_dims() {
            Some([_, h, w]) if h > 0 && w > 0 => {}
            _ => {
                return Err(CnnError::config(format!(
                    "final pooling {sy}x{sx} leaves no cells"
                )))
            }
        }

        if self.dense.is_empty() {
            return Err(CnnError::config("at least one dense layer is required"));
        }
        if self.dense.contains(&0) {
            return Err(CnnError::config("dense layers must have at least one neuron"));
        }
        if self.dense.last() != Some(&OUTPUT_WIDTH) {
            return Err(CnnError::config(format!(
                "the last dense layer must have {OUTPUT_WIDTH} neurons, found {:?}",
                self.dense.last()
            )));
        }
        Ok(())
    }

    fn validate_stage(&self, index: usize, stage: &Stage) -> CnnResult<()> {
        let (input, output) = (self.maps[index], self.maps[index + 1]);
        let (sy, sx) = stage.stride;
        if sy == 0 || sx == 0 {
            return Err(CnnError::config(format!("stage {index} has a zero stride")));
        }
        let expected = if stage.is_pool() {
            if sy > input.height || sx > input.width {
                return Err(CnnError::config(format!(
                    "stage {index} pools {sy}x{sx} over a {}x{} map",
                    input.height, input.width
                )));
            }
            let [h, w] = pooled_dims(input.height, input.width, sx, sy);
            MapDims::new(input.channels, h, w)
        } else {
            let (kh, kw) = stage.kernel;
            if kh % 2 == 0 || kw % 2 == 0 {
                return Err(CnnError::config(format!(
                    "stage {index} kernel {kh}x{kw} must have odd extents"
                )));
            }
            MapDims::new(
                output.channels,
                output_extent(input.height, kh, sy, self.padding),
                output_extent(input.width, kw, sx, self.padding),
            )
        };
        if expected != output {
            return Err(CnnError::config(format!(
                "stage {index} produces {expected:?} but map {} is {output:?}",
                index + 1
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_topology_is_valid() {
        let config = CnnConfig::default();
        config.validate().expect("default config validates");
        assert_eq!(config.dense_inputs(), 3200);
        assert_eq!(config.conv_stage_count(), 4);
    }

    #[test]
    fn even_kernels_are_rejected() {
        let mut config = CnnConfig::default();
        config.stages[0] = Stage::conv((6, 8), (6, 8));
        assert!(matches!(config.validate(), Err(CnnError::Config(_))));
    }

    #[test]
    fn mismatched_maps_are_rejected() {
        let mut config = CnnConfig::default();
        config.maps[2].height = 41;
        assert!(config.validate().is_err());

        let mut config = CnnConfig::default();
        config.stages.pop();
        assert!(config.validate().is_err());
    }

    #[test]
    fn pooling_stages_keep_channels() {
        let config = CnnConfig {
            maps: vec![MapDims::new(2, 8, 8), MapDims::new(2, 4, 4)],
            stages: vec![Stage::pool((2, 2))],
            final_pool: (2, 2),
            dense: vec![3],
            padding: true,
        };
        config.validate().expect("pooling topology validates");
        let mut widened = config.clone();
        widened.maps[1].channels = 3;
        assert!(widened.validate().is_err());
    }

    #[test]
    fn head_must_end_in_three_outputs() {
        let mut config = CnnConfig::default();
        config.dense = vec![512, 4];
        assert!(config.validate().is_err());
        config.dense.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn final_pooling_must_leave_cells() {
        let mut config = CnnConfig::default();
        config.final_pool = (20, 20);
        assert!(config.validate().is_err());
    }

    #[test]
    fn json_round_trip_defaults_padding() {
        let json = r#"{
            "maps": [{"channels": 1, "height": 4, "width": 4}],
            "stages": [],
            "final_pool": [2, 2],
            "dense": [3]
        }"#;
        let config: CnnConfig = serde_json::from_str(json).expect("parse config");
        assert!(config.padding);
        config.validate().expect("single-map config validates");
        let encoded = serde_json::to_string(&config).expect("encode config");
        let decoded: CnnConfig = serde_json::from_str(&encoded).expect("decode config");
        assert_eq!(decoded, config);
    }
}
