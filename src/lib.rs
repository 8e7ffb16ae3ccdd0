pub mod cache;
pub mod config;
pub mod connection;
pub mod exception;
pub mod param;
pub mod reader;
pub mod request;
pub mod server;
pub mod util;

pub use cache::ResponseCache;
pub use config::Config;
pub use exception::Exception;
pub use request::{parse_host, HostInfo, HttpRequest};
pub use server::{Clock, Server, SystemClock};
