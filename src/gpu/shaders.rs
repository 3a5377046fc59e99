/// Dense f32 matrix multiply, one invocation per output cell.
pub const MATMUL: &str = include_str!("shaders/matmul.wgsl");
