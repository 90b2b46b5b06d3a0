pub mod grid;
pub mod optimizer;
pub mod walk_forward;

pub use grid::*;
pub use optimizer::*;
pub use walk_forward::*;
