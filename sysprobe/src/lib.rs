pub mod backend;
pub mod config;
pub mod config_channel;
pub mod consumer;
pub mod controller;
pub mod core_logic;
pub mod decoder;
pub mod error;
pub mod logger;
pub mod probe;
pub mod signal_handler;
pub mod sink;
pub mod stream;
pub mod text;
