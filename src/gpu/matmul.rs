//! GPU matrix multiply.
//!
//! One compute pipeline, created once by [`GpuKernel::try_new`]. Each call
//! uploads both operands, dispatches one invocation per output cell and reads
//! the result back. The device queue is shared by every evaluation worker, so
//! dispatches are serialized behind a mutex. Results match the CPU kernel
//! within float tolerance, not bit for bit.

use std::sync::Mutex;

use wgpu::util::DeviceExt;

use super::{shaders, GpuError};
use crate::matrix::kernel::check_dot_shapes;
use crate::matrix::{CpuKernel, DotKernel, Matrix, MatrixError};

const WORKGROUP_SIZE: u32 = 8;

/// GPU params struct matching the WGSL Params layout.
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct GpuParams {
    m: u32,
    k: u32,
    n: u32,
    _pad: u32,
}

pub struct GpuKernel {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    adapter_name: String,
    dispatch: Mutex<()>,
}

impl GpuKernel {
    /// Capability probe: acquire a device and compile the pipeline.
    pub fn try_new() -> Result<Self, GpuError> {
        let (device, queue, adapter_name) = super::try_create_device()?;

        let shader_module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("matmul"),
            source: wgpu::ShaderSource::Wgsl(shaders::MATMUL.into()),
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("matmul_pipeline"),
            layout: None,
            module: &shader_module,
            entry_point: Some("matmul"),
            compilation_options: Default::default(),
            cache: None,
        });

        Ok(Self {
            device,
            queue,
            pipeline,
            adapter_name,
            dispatch: Mutex::new(()),
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    fn check_limits(&self, m: usize, k: usize, n: usize) -> Result<(), GpuError> {
        let limits = self.device.limits();
        let max_buf = limits
            .max_buffer_size
            .min(limits.max_storage_buffer_binding_size as u64);
        let largest = [m * k, k * n, m * n].into_iter().max().unwrap_or(0) as u64 * 4;
        let groups_x = (n as u64).div_ceil(WORKGROUP_SIZE as u64);
        let groups_y = (m as u64).div_ceil(WORKGROUP_SIZE as u64);
        let max_groups = limits.max_compute_workgroups_per_dimension as u64;
        if largest > max_buf || groups_x > max_groups || groups_y > max_groups {
            return Err(GpuError::TooLarge { m, k, n });
        }
        Ok(())
    }

    /// `a · b` on the device. Shapes must already be compatible.
    pub fn try_dot(&self, a: &Matrix, b: &Matrix) -> Result<Matrix, GpuError> {
        let (m, k, n) = (a.rows(), a.cols(), b.cols());
        if m == 0 || k == 0 || n == 0 {
            // Zero-sized bindings are invalid; the product is all zeros anyway.
            return Ok(Matrix::new(m, n));
        }
        self.check_limits(m, k, n)?;

        let _guard = self
            .dispatch
            .lock()
            .map_err(|_| GpuError::Readback("dispatch lock poisoned".into()))?;

        let lhs_buf = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("lhs"),
                contents: bytemuck::cast_slice(a.as_slice()),
                usage: wgpu::BufferUsages::STORAGE,
            });
        let rhs_buf = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("rhs"),
                contents: bytemuck::cast_slice(b.as_slice()),
                usage: wgpu::BufferUsages::STORAGE,
            });
        let params = GpuParams {
            m: m as u32,
            k: k as u32,
            n: n as u32,
            _pad: 0,
        };
        let params_buf = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("params"),
                contents: bytemuck::bytes_of(&params),
                usage: wgpu::BufferUsages::UNIFORM,
            });

        let output_size = (m * n * 4) as u64;
        let output_buf = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("product"),
            size: output_size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let staging_buf = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("staging"),
            size: output_size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group_layout = self.pipeline.get_bind_group_layout(0);
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("matmul_bind_group"),
            layout: &bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: lhs_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: rhs_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: output_buf.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: params_buf.as_entire_binding(),
                },
            ],
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("matmul_encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("matmul_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(
                (n as u32).div_ceil(WORKGROUP_SIZE),
                (m as u32).div_ceil(WORKGROUP_SIZE),
                1,
            );
        }
        encoder.copy_buffer_to_buffer(&output_buf, 0, &staging_buf, 0, output_size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging_buf.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| GpuError::Readback(e.to_string()))?
            .map_err(|e| GpuError::Readback(e.to_string()))?;

        let cells = {
            let data = slice.get_mapped_range();
            bytemuck::cast_slice::<u8, f32>(&data).to_vec()
        };
        staging_buf.unmap();

        Matrix::from_row_major(m, n, cells).map_err(|e| GpuError::Readback(e.to_string()))
    }
}

/// Standalone use: device failures degrade to the CPU kernel.
impl DotKernel for GpuKernel {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn dot(&self, a: &Matrix, b: &Matrix) -> Result<Matrix, MatrixError> {
        check_dot_shapes(a, b)?;
        match self.try_dot(a, b) {
            Ok(out) => Ok(out),
            Err(_) => CpuKernel.dot(a, b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(rows: usize, cols: usize, seed: f32) -> Matrix {
        let data = (0..rows * cols)
            .map(|i| ((i as f32 * 0.37 + seed).sin()) * 0.5)
            .collect();
        Matrix::from_row_major(rows, cols, data).unwrap()
    }

    // Runs only where an adapter exists; elsewhere the probe fails and the
    // test has nothing to compare.
    #[test]
    fn gpu_matches_cpu_within_tolerance() {
        let Ok(gpu) = GpuKernel::try_new() else {
            return;
        };
        let a = filled(37, 53, 0.1);
        let b = filled(53, 29, 0.7);
        let expected = CpuKernel.dot(&a, &b).unwrap();
        let actual = gpu.dot(&a, &b).unwrap();
        assert_eq!(actual.shape(), expected.shape());
        for (x, y) in actual.as_slice().iter().zip(expected.as_slice()) {
            assert!((x - y).abs() < 1e-3, "{x} vs {y}");
        }
    }
}
