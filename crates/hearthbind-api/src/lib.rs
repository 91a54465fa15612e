// hearthbind-api: vendor transport layer (sessions, requests, retry policy)

pub mod error;
pub mod executor;
pub mod request;
pub mod session;
pub mod transport;

pub use error::Error;
pub use executor::{CallExecutor, RetryPolicy};
pub use request::{Method, VendorRequest, VendorResponse};
pub use session::{Credentials, Session, SessionHandle};
pub use transport::{TlsMode, TransportConfig};
