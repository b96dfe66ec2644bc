mod api;
mod types;

pub use api::*;
