pub mod chat;
pub mod events;
pub mod gallery;
pub mod notify;
pub mod prompts;
pub mod providers;
pub mod storage;
