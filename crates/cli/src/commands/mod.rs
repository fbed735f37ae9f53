pub mod compare;
pub mod coreinfo;
pub mod tools;

pub use compare::*;
pub use coreinfo::*;
pub use tools::*;
