pub use alloy::primitives::{Address, B256, Bytes, U256};

mod batch;
mod l1;

pub mod storage;

pub use batch::*;
pub use l1::*;
