mod base;
mod insert;
pub mod iterator;
mod remove;

pub use base::BPlusTree;
pub(crate) use base::{OpContext, OpType};
