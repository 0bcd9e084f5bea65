mod builder;
mod node;

#[cfg(test)]
mod builder_test;

pub use builder::*;
pub use node::*;
