//! Networks and training loops on top of `tch` (PyTorch Rust bindings).
//!
//! Everything under this module needs the `tch-backend` feature. Conversions
//! between `ndarray` buffers and tensors, device selection and the weight
//! export/import used by [`ModelBundle`](crate::bundle::ModelBundle) live
//! here.

pub mod encoder;
pub mod flow;
pub mod freqcoder;
pub mod ganf;
pub mod gnn;
pub mod rancoders;
pub mod ransyncoders;
pub mod sincoder;

use ndarray::{Array1, Array2, Array3, ArrayBase, Data, Dimension};
use tch::{nn::VarStore, Device, Kind, Tensor};

use crate::bundle::WeightRecord;
use crate::config::Activation;
use crate::error::{TrainError, TrainResult};

/// CUDA when requested and available, otherwise CPU.
pub fn select_device(use_gpu: bool) -> Device {
    if use_gpu {
        Device::cuda_if_available()
    } else {
        Device::Cpu
    }
}

/// Apply a configured activation.
pub fn activate(activation: Activation, x: &Tensor) -> Tensor {
    match activation {
        Activation::Relu => x.relu(),
        Activation::Sigmoid => x.sigmoid(),
        Activation::Tanh => x.tanh(),
        Activation::Linear => x.shallow_clone(),
    }
}

// ---------------------------------------------------------------------------
// ndarray <-> Tensor
// ---------------------------------------------------------------------------

/// Copy an `f32` array or view into a float tensor on `device`.
pub fn to_tensor<S, D>(a: &ArrayBase<S, D>, device: Device) -> Tensor
where
    S: Data<Elem = f32>,
    D: Dimension,
{
    let shape: Vec<i64> = a.shape().iter().map(|&d| d as i64).collect();
    let data: Vec<f32> = a.iter().copied().collect();
    Tensor::from_slice(&data).view(shape.as_slice()).to_device(device)
}

/// Flatten a tensor into host memory, row-major.
pub fn to_vec(t: &Tensor) -> TrainResult<Vec<f32>> {
    let flat = t
        .detach()
        .to_device(Device::Cpu)
        .to_kind(Kind::Float)
        .contiguous()
        .flatten(0, -1);
    Ok(Vec::<f32>::try_from(&flat)?)
}

fn dims(t: &Tensor) -> Vec<usize> {
    t.size().iter().map(|&d| d as usize).collect()
}

/// Copy a 1-D tensor into an [`Array1`].
pub fn to_array1(t: &Tensor) -> TrainResult<Array1<f32>> {
    match dims(t).as_slice() {
        [_] => Ok(Array1::from_vec(to_vec(t)?)),
        other => Err(TrainError::shape_mismatch(vec![0], other.to_vec())),
    }
}

/// Copy a 2-D tensor into an [`Array2`].
pub fn to_array2(t: &Tensor) -> TrainResult<Array2<f32>> {
    match dims(t).as_slice() {
        &[r, c] => Array2::from_shape_vec((r, c), to_vec(t)?)
            .map_err(|_| TrainError::shape_mismatch(vec![r, c], dims(t))),
        other => Err(TrainError::shape_mismatch(vec![0, 0], other.to_vec())),
    }
}

/// Copy a 3-D tensor into an [`Array3`].
pub fn to_array3(t: &Tensor) -> TrainResult<Array3<f32>> {
    match dims(t).as_slice() {
        &[a, b, c] => Array3::from_shape_vec((a, b, c), to_vec(t)?)
            .map_err(|_| TrainError::shape_mismatch(vec![a, b, c], dims(t))),
        other => Err(TrainError::shape_mismatch(vec![0, 0, 0], other.to_vec())),
    }
}

// ---------------------------------------------------------------------------
// Weight export / import
// ---------------------------------------------------------------------------

/// Every variable of `vs` (trainable or not), sorted by name.
pub fn export_weights(vs: &VarStore) -> TrainResult<Vec<WeightRecord>> {
    let mut vars: Vec<(String, Tensor)> = vs.variables().into_iter().collect();
    vars.sort_by(|a, b| a.0.cmp(&b.0));
    vars.iter()
        .map(|(name, t)| {
            Ok(WeightRecord {
                name: name.clone(),
                shape: dims(t),
                data: to_vec(t)?,
            })
        })
        .collect()
}

/// Overwrite every variable of `vs` with the matching record.
///
/// # Errors
///
/// [`TrainError::Bundle`] when a variable has no record or the shapes differ.
pub fn import_weights(vs: &VarStore, weights: &[WeightRecord]) -> TrainResult<()> {
    for (name, var) in vs.variables() {
        let record = weights
            .iter()
            .find(|w| w.name == name)
            .ok_or_else(|| TrainError::bundle(format!("missing weight `{name}`"), None))?;
        if record.shape != dims(&var) {
            return Err(TrainError::bundle(
                format!(
                    "weight `{name}` has shape {:?}, network expects {:?}",
                    record.shape,
                    dims(&var)
                ),
                None,
            ));
        }
        let shape: Vec<i64> = record.shape.iter().map(|&d| d as i64).collect();
        let src = Tensor::from_slice(&record.data)
            .view(shape.as_slice())
            .to_device(var.device());
        let mut dst = var;
        tch::no_grad(|| dst.copy_(&src));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tch::nn;

    #[test]
    fn array_tensor_round_trip() {
        let a = array![[1.0_f32, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let t = to_tensor(&a, Device::Cpu);
        assert_eq!(t.size(), vec![2, 3]);
        assert_eq!(to_array2(&t).unwrap(), a);
        assert!(to_array3(&t).is_err());
    }

    #[test]
    fn weights_survive_export_import() {
        let src = VarStore::new(Device::Cpu);
        let _ = nn::linear(src.root() / "layer", 3, 2, Default::default());
        let exported = export_weights(&src).unwrap();
        assert_eq!(exported.len(), 2);
        assert_eq!(exported[0].name, "layer.bias");

        let dst = VarStore::new(Device::Cpu);
        let _ = nn::linear(dst.root() / "layer", 3, 2, Default::default());
        import_weights(&dst, &exported).unwrap();
        assert_eq!(export_weights(&dst).unwrap(), exported);
    }

    #[test]
    fn missing_weight_is_reported() {
        let vs = VarStore::new(Device::Cpu);
        let _ = nn::linear(vs.root() / "layer", 3, 2, Default::default());
        assert!(matches!(import_weights(&vs, &[]), Err(TrainError::Bundle { .. })));
    }
}
