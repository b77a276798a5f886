pub mod model;
pub mod context;
pub mod error;
pub mod store;
pub mod image_store;
pub mod proto;
pub mod service;
pub mod codec;
pub mod server;
pub mod client;
pub mod api;
pub mod config;
pub mod parser;
pub mod sample;
pub mod serializer;

pub use crate::context::CallContext;
pub use crate::error::{Code, Status, StoreError};
pub use crate::image_store::{DiskImageStore, ImageStore};
pub use crate::service::LaptopService;
pub use crate::store::{InMemoryLaptopStore, LaptopStore};
