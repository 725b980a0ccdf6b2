pub mod network;
pub mod upload;
