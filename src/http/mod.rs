pub mod error;
pub mod multipart;
pub mod server;
