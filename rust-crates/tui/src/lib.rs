pub mod config;

pub mod ddragon_client;

pub mod http;

pub mod peers;

pub mod randomness;
