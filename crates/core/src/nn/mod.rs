pub mod layers;
pub mod model;

pub use layers::*;
pub use model::*;
