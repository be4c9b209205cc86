mod download;
mod identifier;
mod linkcheck;
mod queue;
mod search;
mod shoulder;

pub use download::*;
pub use identifier::*;
pub use linkcheck::*;
pub use queue::*;
pub use search::*;
pub use shoulder::*;

#[cfg(test)]
mod tests;
