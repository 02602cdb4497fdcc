pub mod orchestrator;
pub mod producers;
pub mod report;
pub mod runner;

pub use orchestrator::*;
pub use producers::*;
pub use report::*;
pub use runner::*;
