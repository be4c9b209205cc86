mod generator;
mod mask;
mod state;
mod store;

pub use generator::*;
pub use mask::*;
pub use state::*;
pub use store::*;

#[cfg(test)]
mod tests;
