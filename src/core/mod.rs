pub mod error;
pub mod logger;

pub use error::{BuildError, Result, RuntimeError};
pub use logger::Logger;
