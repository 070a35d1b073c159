pub mod cache;
pub mod context;
pub mod image_builder;
pub mod plan;
pub mod service;

pub use cache::*;
pub use context::*;
pub use image_builder::*;
pub use plan::*;
pub use service::*;
