pub mod json;

pub use json::{JsonConfiguration, parse_duration};
