//! Request and response value types.
//!
//! These are plain data carriers. Validation of header values and target
//! URLs happens in the [`guard`](crate::guard) module, not at construction,
//! so that malformed requests can still be built and inspected.

mod headers;
mod request;
mod response;

pub use headers::Headers;
pub use request::{Method, Request, RequestBody, RequestBuilder, REQUEST_ID_HEADER};
pub use response::{parse_retry_after, Response};
