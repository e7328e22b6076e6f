pub mod binance;
pub mod bybit;
pub mod core;
pub mod credentials;
pub mod kv;
pub mod mock;
pub mod persistence;
