pub mod compression;
pub mod network;
pub mod photos;
pub mod processor;
pub mod queue;
pub mod retry;
pub mod store;
pub mod upload;
