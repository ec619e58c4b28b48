pub mod color;
pub mod errors;
pub mod merger;
pub mod metadata;
pub mod models;
pub mod pipeline;
pub mod thumbnail;
