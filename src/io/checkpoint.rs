//! JSON snapshots of network parameters

use crate::autograd::Tensor;
use crate::error::{Error, Result};
use crate::nn::Network;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Flat parameter arrays for every network role, tagged with the epoch and
/// validation score that produced them.
///
/// Normalization running statistics travel with the parameters since
/// [`Network::named_params`] includes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub epoch: usize,
    pub score: f64,
    pub roles: BTreeMap<String, BTreeMap<String, Vec<f32>>>,
}

impl Checkpoint {
    pub fn new(epoch: usize, score: f64) -> Self {
        Self { epoch, score, roles: BTreeMap::new() }
    }

    /// Capture a network's parameters under a role name
    pub fn capture(&mut self, role: &str, network: &dyn Network) {
        let params = network
            .named_params()
            .into_iter()
            .map(|(name, t)| (name, t.to_vec()))
            .collect();
        self.roles.insert(role.to_string(), params);
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        serde_json::to_writer(BufWriter::new(file), self)
            .map_err(|e| Error::Serialization(format!("writing {}: {e}", path.display())))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(BufReader::new(file))
            .map_err(|e| Error::Serialization(format!("reading {}: {e}", path.display())))
    }

    /// Restore a role's parameters into a constructed network.
    ///
    /// Every stored array must match an existing parameter of the same name
    /// and length.
    pub fn apply(&self, role: &str, network: &dyn Network) -> Result<()> {
        let stored = self
            .roles
            .get(role)
            .ok_or_else(|| Error::Serialization(format!("checkpoint has no role \"{role}\"")))?;
        let live: BTreeMap<String, Tensor> = network.named_params().into_iter().collect();
        for (name, values) in stored {
            let param = live.get(name).ok_or_else(|| {
                Error::Serialization(format!("role \"{role}\" has no parameter \"{name}\""))
            })?;
            if param.len() != values.len() {
                return Err(Error::Shape(format!(
                    "parameter \"{name}\" expects {} values, checkpoint has {}",
                    param.len(),
                    values.len()
                )));
            }
            param
                .data_mut()
                .iter_mut()
                .zip(values)
                .for_each(|(d, &v)| *d = v);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::Linear;

    struct OneLayer {
        lin: Linear,
    }

    impl Network for OneLayer {
        fn named_params(&self) -> Vec<(String, Tensor)> {
            self.lin.named_params("lin")
        }
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ckpt.json");

        let net = OneLayer { lin: Linear::new(3, 2) };
        let before: Vec<Vec<f32>> =
            net.named_params().iter().map(|(_, t)| t.to_vec()).collect();

        let mut ckpt = Checkpoint::new(7, 0.91);
        ckpt.capture("Encoder", &net);
        ckpt.save(&path).unwrap();

        let restored = Checkpoint::load(&path).unwrap();
        assert_eq!(restored.epoch, 7);

        let fresh = OneLayer { lin: Linear::new(3, 2) };
        restored.apply("Encoder", &fresh).unwrap();
        let after: Vec<Vec<f32>> =
            fresh.named_params().iter().map(|(_, t)| t.to_vec()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_apply_missing_role_fails() {
        let ckpt = Checkpoint::new(0, 0.0);
        let net = OneLayer { lin: Linear::new(2, 2) };
        assert!(ckpt.apply("Decoder", &net).is_err());
    }

    #[test]
    fn test_apply_shape_mismatch_fails() {
        let small = OneLayer { lin: Linear::new(2, 2) };
        let mut ckpt = Checkpoint::new(0, 0.0);
        ckpt.capture("Encoder", &small);

        let large = OneLayer { lin: Linear::new(4, 4) };
        assert!(ckpt.apply("Encoder", &large).is_err());
    }
}
