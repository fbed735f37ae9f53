pub mod analysis;
pub mod classifier;
pub mod compare;
pub mod debugger;
pub mod threads;
pub mod transcript;
