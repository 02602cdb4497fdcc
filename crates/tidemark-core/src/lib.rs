pub mod dates;
pub mod errors;
pub mod model;
pub mod plan;

pub use dates::*;
pub use errors::*;
pub use model::*;
pub use plan::*;
