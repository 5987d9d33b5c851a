//! The inbound request shape the pipeline operates on (`§4.9`).
//!
//! This is deliberately not `http::Request` or any particular web
//! framework's type -- the HTTP transport adapter (out of scope for the
//! core, `§1`) is expected to build one of these from whatever request type
//! it owns.

/// A request handed to the pipeline, already stripped of any mount prefix.
#[derive(Clone, Debug, Default)]
pub struct MockRequest {
    pub method: String,
    pub path: String,
    /// `(name, value)` pairs, in the order received. Header lookup is
    /// case-insensitive per HTTP semantics.
    pub headers: Vec<(String, String)>,
    /// The raw query string, without the leading `?`.
    pub query: String,
    pub body: Vec<u8>,
}

impl MockRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}
