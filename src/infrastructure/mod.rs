pub mod blob_store;
pub mod config;
pub mod credential_store;
pub mod deep_link;
pub mod error;
pub mod flashcard_addon;
pub mod group_cache;
pub mod group_config;
pub mod host_client;
