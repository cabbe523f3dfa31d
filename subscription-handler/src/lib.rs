pub mod callback;
pub mod config;
pub mod error;
pub mod handler;
pub mod lookup;
pub mod reconciler;
pub mod request;
