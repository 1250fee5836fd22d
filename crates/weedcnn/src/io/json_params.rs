use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::env::{self, PARAMS_DIR_VAR};
use crate::model::{CnnConfig, InMemoryParams, ParamSource};
use crate::tensor::{Nested2, Nested3, Nested5};

pub const CONV_WEIGHTS_FILE: &str = "kernelWeights.json";
pub const CONV_BIASES_FILE: &str = "kernelBiases.json";
pub const DENSE_WEIGHTS_FILE: &str = "mlpWeights.json";
pub const DENSE_BIASES_FILE: &str = "mlpBiases.json";
pub const PIXEL_STATS_FILE: &str = "pixelStats.json";

/// Directory of JSON parameter files, one nested array per file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonParamDir {
    root: PathBuf,
}

impl JsonParamDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Uses the directory named by `WEEDCNN_PARAMS_DIR`.
    pub fn from_env() -> Result<Self> {
        env::params_dir()
            .map(Self::new)
            .ok_or_else(|| anyhow!("{PARAMS_DIR_VAR} is not set"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read<T: DeserializeOwned>(&self, file: &str) -> Result<T> {
        let path = self.root.join(file);
        let reader = File::open(&path)
            .map(BufReader::new)
            .with_context(|| format!("failed to open {}", path.display()))?;
        serde_json::from_reader(reader)
            .with_context(|| format!("failed to parse {}", path.display()))
    }

    fn write_one<T: Serialize>(&self, file: &str, value: &T) -> Result<()> {
        let path = self.root.join(file);
        let mut writer = File::create(&path)
            .map(BufWriter::new)
            .with_context(|| format!("failed to create {}", path.display()))?;
        serde_json::to_writer(&mut writer, value)
            .with_context(|| format!("failed to encode {}", path.display()))?;
        writer.flush()?;
        Ok(())
    }

    /// Writes all five parameter files, creating the directory if needed.
    pub fn save(&self, params: &InMemoryParams) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("failed to create {}", self.root.display()))?;
        self.write_one(CONV_WEIGHTS_FILE, &params.conv_weights)?;
        self.write_one(CONV_BIASES_FILE, &params.conv_biases)?;
        self.write_one(DENSE_WEIGHTS_FILE, &params.dense_weights)?;
        self.write_one(DENSE_BIASES_FILE, &params.dense_biases)?;
        self.write_one(PIXEL_STATS_FILE, &params.pixel_stats)?;
        Ok(())
    }

    /// Reads every file into memory at once.
    pub fn load_all(&self) -> Result<InMemoryParams> {
        Ok(InMemoryParams {
            conv_weights: self.conv_weights()?,
            conv_biases: self.conv_biases()?,
            dense_weights: self.dense_weights()?,
            dense_biases: self.dense_biases()?,
            pixel_stats: self.pixel_stats()?,
        })
    }
}

impl ParamSource for JsonParamDir {
    fn conv_weights(&self) -> Result<Nested5> {
        self.read(CONV_WEIGHTS_FILE)
    }

    fn conv_biases(&self) -> Result<Nested2> {
        self.read(CONV_BIASES_FILE)
    }

    fn dense_weights(&self) -> Result<Nested3> {
        self.read(DENSE_WEIGHTS_FILE)
    }

    fn dense_biases(&self) -> Result<Nested2> {
        self.read(DENSE_BIASES_FILE)
    }

    fn pixel_stats(&self) -> Result<Nested2> {
        self.read(PIXEL_STATS_FILE)
    }
}

/// Reads a topology from a JSON file.
pub fn load_config(path: impl AsRef<Path>) -> Result<CnnConfig> {
    let path = path.as_ref();
    let reader = File::open(path)
        .map(BufReader::new)
        .with_context(|| format!("failed to open {}", path.display()))?;
    serde_json::from_reader(reader).with_context(|| format!("failed to parse {}", path.display()))
}
