use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

use log::info;
use serde::{Deserialize, Serialize};

use crate::{
    MlErr, Result,
    arch::{Model, TcnConfig, TemporalConvNet},
};

/// A single named parameter, its values flattened in row major order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedParam {
    pub name: String,
    pub shape: Vec<usize>,
    pub values: Vec<f64>,
}

/// Everything needed to rebuild a trained `TemporalConvNet`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub config: TcnConfig,
    /// Every parameter, in the model's buffer order.
    pub params: Vec<NamedParam>,
}

impl Checkpoint {
    /// Takes a snapshot of the model's config and parameters.
    pub fn from_model(model: &TemporalConvNet) -> Self {
        let values = model.params();
        let params = model
            .named_parameters()
            .iter()
            .map(|info| NamedParam {
                name: info.name.clone(),
                shape: info.shape.clone(),
                values: values[info.range.clone()].to_vec(),
            })
            .collect();

        Self {
            config: model.config().clone(),
            params,
        }
    }

    /// Rebuilds the architecture from the config and restores every parameter.
    ///
    /// # Returns
    /// The model, in training mode, or a `Checkpoint` error if the names, shapes or lengths of
    /// the stored parameters don't match the architecture, in order.
    pub fn into_model(self) -> Result<TemporalConvNet> {
        let mut model = TemporalConvNet::uninit(self.config)?;

        let expected = model.named_parameters();
        if expected.len() != self.params.len() {
            return Err(MlErr::Checkpoint(format!(
                "expected {} parameters, found {}",
                expected.len(),
                self.params.len()
            )));
        }

        let mut values = Vec::with_capacity(model.size());
        for (info, param) in expected.iter().zip(&self.params) {
            if info.name != param.name || info.shape != param.shape {
                return Err(MlErr::Checkpoint(format!(
                    "expected parameter {} with shape {:?}, found {} with shape {:?}",
                    info.name, info.shape, param.name, param.shape
                )));
            }
            if param.values.len() != info.range.len() {
                return Err(MlErr::Checkpoint(format!(
                    "parameter {} holds {} values, expected {}",
                    param.name,
                    param.values.len(),
                    info.range.len()
                )));
            }
            values.extend_from_slice(&param.values);
        }

        model.load_params(&values)?;
        Ok(model)
    }

    /// Writes the checkpoint as JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }

    /// Reads a JSON checkpoint.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

/// Saves a model's config and parameters to `path`.
pub fn save<P: AsRef<Path>>(model: &TemporalConvNet, path: P) -> Result<()> {
    let path = path.as_ref();
    Checkpoint::from_model(model).save(path)?;
    info!(params = model.size(); "saved checkpoint to {}", path.display());
    Ok(())
}

/// Loads a model saved by [`save`].
pub fn load<P: AsRef<Path>>(path: P) -> Result<TemporalConvNet> {
    let path = path.as_ref();
    let model = Checkpoint::load(path)?.into_model()?;
    info!(params = model.size(); "loaded checkpoint from {}", path.display());
    Ok(model)
}
