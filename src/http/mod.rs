//! Exchange client: sends requests for a test and remembers the last
//! request/response pair so the inspection pipeline can look at it.

pub mod client;
pub mod method;
pub mod request;
pub mod response;

pub use client::{Exchange, ExchangeClient};
pub use method::HttpMethod;
pub use request::{CapturedRequest, RequestInput};
pub use response::CapturedResponse;
