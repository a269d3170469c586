use log::{debug, warn};
use memmap2::MmapOptions;
use safetensors::{Dtype, SafeTensors};
use std::fs::File;
use std::path::Path;
use tch::{nn, Kind, Tensor};

use crate::error::{ModelError, Result};

fn kind_of(dtype: Dtype) -> Result<Kind> {
    match dtype {
        Dtype::F32 => Ok(Kind::Float),
        Dtype::F16 => Ok(Kind::Half),
        Dtype::BF16 => Ok(Kind::BFloat16),
        Dtype::F64 => Ok(Kind::Double),
        other => Err(ModelError::UnsupportedDtype(format!("{:?}", other))),
    }
}

/// Copies every tensor in a safetensors file into the matching variable of `vs`.
///
/// Returns the number of variables restored. Tensors with no matching variable
/// are skipped with a warning; a shape disagreement is an error.
pub fn load_safetensors<P: AsRef<Path>>(vs: &mut nn::VarStore, path: P) -> Result<usize> {
    let file = File::open(path)?;
    // SAFETY: the file is opened read-only and not modified while mapped.
    let buffer = unsafe { MmapOptions::new().map(&file)? };
    let tensors = SafeTensors::deserialize(&buffer)?;

    let mut variables = vs.variables();
    let device = vs.device();
    let mut restored = 0;

    for (name, view) in tensors.tensors() {
        let Some(var) = variables.get_mut(&name) else {
            warn!("Tensor {} found in safetensors but not in model", name);
            continue;
        };

        let shape: Vec<i64> = view.shape().iter().map(|&x| x as i64).collect();
        if shape != var.size() {
            return Err(ModelError::ShapeMismatch {
                name,
                expected: var.size(),
                found: shape,
            });
        }

        let kind = kind_of(view.dtype())?;
        let loaded = Tensor::f_from_data_size(view.data(), &shape, kind)?
            .to_device(device)
            .to_kind(var.kind());

        tch::no_grad(|| var.f_copy_(&loaded))?;
        debug!("Loaded tensor: {}", name);
        restored += 1;
    }

    Ok(restored)
}

/// Writes every variable of `vs` to `path` in safetensors format.
pub fn save_safetensors<P: AsRef<Path>>(vs: &nn::VarStore, path: P) -> Result<()> {
    vs.save(path.as_ref().with_extension("safetensors"))?;
    Ok(())
}
