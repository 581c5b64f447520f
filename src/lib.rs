pub mod cache;
pub mod config;
pub mod error;
pub mod normalize;
pub mod places;
pub mod predictions;
pub mod select;
pub mod server;
pub mod upstream;
