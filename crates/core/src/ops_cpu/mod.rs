pub mod conv;
pub mod matmul;
pub mod quant;
pub mod relu;

pub use conv::*;
pub use matmul::*;
pub use quant::*;
pub use relu::*;
