pub mod config;
pub mod logger;
pub mod rpc_client;
