//! URL and query-string helpers.
//!
//! Pure functions: nothing here touches connections or handlers. Requests
//! expose them through [`Request::url`](crate::http::request::Request::url)
//! and [`Request::query`](crate::http::request::Request::query).

pub mod query;
pub mod split;

pub use query::{parse_query, stringify_query, QueryMap};
pub use split::Url;
