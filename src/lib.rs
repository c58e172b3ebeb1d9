pub mod constants;
pub mod engine;
pub mod grid;
pub mod logging;
pub mod server_protocol;
pub mod server_utils;
pub mod types;
pub mod world;
