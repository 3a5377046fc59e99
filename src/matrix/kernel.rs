//! Dot-product strategies.
//!
//! [`CpuKernel`] is the reference implementation and is always available.
//! [`KernelSet`] routes large products to a GPU kernel when the one-time
//! capability probe found a device, and falls back to the CPU on any device
//! error. Network code only ever sees `&dyn DotKernel`.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

use super::{Matrix, MatrixError};
use crate::gpu::GpuKernel;

/// Left-operand cell count above which products are offloaded.
pub const DEFAULT_OFFLOAD_THRESHOLD: usize = 1000;

pub trait DotKernel: Send + Sync {
    fn name(&self) -> &'static str;

    /// `a · b`; fails with `DimensionMismatch` unless `a.cols() == b.rows()`.
    fn dot(&self, a: &Matrix, b: &Matrix) -> Result<Matrix, MatrixError>;
}

pub(crate) fn check_dot_shapes(a: &Matrix, b: &Matrix) -> Result<(), MatrixError> {
    if a.cols() != b.rows() {
        return Err(MatrixError::DimensionMismatch {
            op: "dot",
            left: a.shape(),
            right: b.shape(),
        });
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CpuKernel;

impl DotKernel for CpuKernel {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn dot(&self, a: &Matrix, b: &Matrix) -> Result<Matrix, MatrixError> {
        check_dot_shapes(a, b)?;
        let (m, k, n) = (a.rows(), a.cols(), b.cols());
        let mut out = Matrix::new(m, n);
        let lhs = a.as_slice();
        let rhs = b.as_slice();
        let dst = out.as_mut_slice();
        // i-k-j order: each output cell still accumulates over k ascending.
        for i in 0..m {
            let row = &mut dst[i * n..(i + 1) * n];
            for p in 0..k {
                let scale = lhs[i * k + p];
                let rhs_row = &rhs[p * n..(p + 1) * n];
                for (cell, &r) in row.iter_mut().zip(rhs_row) {
                    *cell += scale * r;
                }
            }
        }
        Ok(out)
    }
}

/// CPU kernel plus an optional accelerator registered by [`KernelSet::probe`].
pub struct KernelSet {
    cpu: CpuKernel,
    accelerated: Option<GpuKernel>,
    threshold: usize,
    fallback_reported: AtomicBool,
}

impl KernelSet {
    /// CPU only.
    pub fn cpu() -> Self {
        Self {
            cpu: CpuKernel,
            accelerated: None,
            threshold: usize::MAX,
            fallback_reported: AtomicBool::new(false),
        }
    }

    /// Probe for a GPU once; register it when found. Products whose left
    /// operand has more than `threshold` cells go to the device.
    pub fn probe(threshold: usize) -> Self {
        match GpuKernel::try_new() {
            Ok(gpu) => {
                info!(adapter = gpu.adapter_name(), threshold, "accelerated dot product enabled");
                Self::with_accelerator(gpu, threshold)
            }
            Err(err) => {
                info!(reason = %err, "no accelerator, using CPU dot product");
                Self::cpu()
            }
        }
    }

    pub fn with_accelerator(gpu: GpuKernel, threshold: usize) -> Self {
        Self {
            cpu: CpuKernel,
            accelerated: Some(gpu),
            threshold,
            fallback_reported: AtomicBool::new(false),
        }
    }

    pub fn is_accelerated(&self) -> bool {
        self.accelerated.is_some()
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }
}

impl Default for KernelSet {
    fn default() -> Self {
        Self::cpu()
    }
}

impl DotKernel for KernelSet {
    fn name(&self) -> &'static str {
        if self.accelerated.is_some() {
            "cpu+gpu"
        } else {
            "cpu"
        }
    }

    fn dot(&self, a: &Matrix, b: &Matrix) -> Result<Matrix, MatrixError> {
        check_dot_shapes(a, b)?;
        if let Some(gpu) = &self.accelerated {
            if a.len() > self.threshold {
                match gpu.try_dot(a, b) {
                    Ok(out) => return Ok(out),
                    Err(err) => {
                        if !self.fallback_reported.swap(true, Ordering::Relaxed) {
                            warn!(reason = %err, "accelerated dot failed, falling back to CPU");
                        }
                    }
                }
            }
        }
        self.cpu.dot(a, b)
    }
}
