pub mod base;
pub mod configs;
pub mod embedding;
pub mod local_embedding;
pub mod openai;
pub mod utils;

#[cfg(test)]
pub mod mock;
