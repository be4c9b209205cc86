mod name;
mod shadow;

pub use name::*;
pub use shadow::*;

#[cfg(test)]
mod tests;
