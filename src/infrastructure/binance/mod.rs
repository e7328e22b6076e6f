pub mod execution;
pub mod user_stream;

pub use execution::BinanceAdapter;
pub use user_stream::BinanceUserDataStream;
