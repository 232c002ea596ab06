pub mod gpu;
pub mod reference;
pub mod render;
pub mod shader;
