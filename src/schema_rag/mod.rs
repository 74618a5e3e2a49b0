pub mod retriever;

pub use retriever::*;
