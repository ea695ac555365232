pub mod channel;
pub mod config;
pub mod console;
pub mod controller;
pub mod logging;
pub mod request;
