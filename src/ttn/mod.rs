pub mod client;
pub mod models;
pub mod parser;
pub mod transport;

pub use client::{Pull, TtnClient};
pub use models::UplinkRecord;
pub use transport::{HttpTransport, StorageTransport};
