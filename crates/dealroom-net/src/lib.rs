// Backend access for the deal room: the transport and object-store ports
// plus their HTTP implementations.

pub mod http;
pub mod ports;
pub mod storage;

pub use http::HttpTransport;
pub use ports::{ObjectStore, Transport, TransportResult};
pub use storage::{locate_object, HttpObjectStore};
