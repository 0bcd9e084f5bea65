mod async_task;
mod convert;
mod time;

#[cfg(test)]
mod convert_test;

pub(crate) use async_task::*;
pub use convert::*;
pub(crate) use time::*;
