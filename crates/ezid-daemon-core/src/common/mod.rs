mod error;
mod types;

pub use error::*;
pub use types::*;
