pub mod log;
pub mod pipeline;
pub mod process;
pub mod request;
pub mod resolver;
pub mod scratch;
pub mod source;
pub mod store;
