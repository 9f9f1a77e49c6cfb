pub mod backend;
pub mod cancel;
pub mod config;
pub mod context;
pub mod discovery;
pub mod error;
pub mod fanout;
pub mod request;
pub mod session;
pub mod transport;
pub mod util;

pub use backend::{ApiVariant, Backend, Credentials};
pub use context::NetContext;
pub use error::{Error, Result};
pub use request::{Method, RequestDescriptor, ResponseResult};
pub use transport::{TransportConfig, TransportManager};
