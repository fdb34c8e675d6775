pub mod context;
pub mod credentials;
pub mod events;
pub mod key_fetcher;
pub mod registration;
pub mod strings;
