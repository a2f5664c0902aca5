pub mod chat_service;
pub mod classifier;
pub mod encoder;
pub mod lifecycle;
pub mod observer;
pub mod stream_lock;
