pub mod entity_store;
pub mod error;
pub mod event_service;
pub mod inmemory;

pub use event_service::EventService;
pub use inmemory::{InMemoryEntityStore, InMemoryUnitOfWork};
