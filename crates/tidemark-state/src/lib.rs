pub mod error;
pub mod json;
pub mod memory;
pub mod traits;

pub use error::*;
pub use json::*;
pub use memory::*;
pub use traits::*;
