pub mod frame_pool;
pub mod geometry;
pub mod software_backend;
pub mod transform_compositor;
