pub mod complaint;

pub use complaint::*;
