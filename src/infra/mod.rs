pub mod auth;
pub mod error;
pub mod integrity;
pub mod memory;
pub mod mongo;
pub mod routes;
pub mod shopping;
pub mod short_link;
pub mod store;
pub mod types;
pub mod views;

pub use error::RepError;
pub use memory::InMemoryRep;
pub use mongo::MongoRep;
pub use routes::*;
pub use store::{RecipeStore, Repo};
