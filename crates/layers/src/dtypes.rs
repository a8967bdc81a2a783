//! Precision policy for projections whose parameters may be stored in
//! `f16`/`bf16`.
//!
//! Parameters keep their storage dtype while matmuls and the gate sigmoid run
//! in `f32`; results are cast back to the storage dtype. Not every backend
//! implements reduced-precision matmuls (candle's CPU backend has no `bf16`
//! matmul), so every projection in this workspace goes through a
//! [`PrecisionPolicy`].

use candle_core::{DType, Result, Tensor};

/// Storage and compute dtypes for one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrecisionPolicy {
    storage: DType,
    compute: DType,
}

impl PrecisionPolicy {
    pub fn new(storage: DType, compute: DType) -> Self {
        Self { storage, compute }
    }

    /// Promotes half-precision storage to `f32` compute; wider dtypes compute
    /// as stored.
    pub fn from_parameter_dtype(storage: DType) -> Self {
        let compute = match storage {
            DType::F16 | DType::BF16 => DType::F32,
            other => other,
        };
        Self::new(storage, compute)
    }

    pub fn storage(&self) -> DType {
        self.storage
    }

    pub fn compute(&self) -> DType {
        self.compute
    }

    pub fn is_mixed_precision(&self) -> bool {
        self.storage != self.compute
    }

    pub fn cast_for_matmul(&self, tensor: &Tensor) -> Result<Tensor> {
        cast_tensor(tensor, self.compute)
    }

    pub fn cast_to_storage(&self, tensor: &Tensor) -> Result<Tensor> {
        cast_tensor(tensor, self.storage)
    }
}

fn cast_tensor(tensor: &Tensor, dtype: DType) -> Result<Tensor> {
    if tensor.dtype() == dtype {
        Ok(tensor.clone())
    } else {
        tensor.to_dtype(dtype)
    }
}
