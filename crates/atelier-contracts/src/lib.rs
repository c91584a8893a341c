pub mod chat;
pub mod error;
pub mod events;
pub mod media;
pub mod models;
pub mod search;
pub mod speech;
pub mod store;
