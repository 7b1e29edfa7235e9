pub mod server;

pub use server::NameNodeServer;
