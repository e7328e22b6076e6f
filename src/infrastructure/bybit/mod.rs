pub mod execution;
pub mod user_stream;

pub use execution::BybitAdapter;
pub use user_stream::BybitUserDataStream;
