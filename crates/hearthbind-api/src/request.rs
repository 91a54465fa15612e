// Generic request/response surface between the poll loop and a vendor API.
//
// Vendor adapters describe what they want fetched or written; the executor
// turns it into HTTP. Exact payload schemas stay vendor-specific -- bodies
// travel as `serde_json::Value` and adapters parse them at the edge.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// HTTP method subset used by vendor APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

/// One remote call against a vendor endpoint.
#[derive(Debug, Clone)]
pub struct VendorRequest {
    pub method: Method,
    /// Path relative to the executor's base URL, e.g. `"devices/42/state"`.
    pub path: String,
    /// Query parameters appended to the URL.
    pub query: Vec<(String, String)>,
    /// JSON body for POST/PUT.
    pub body: Option<Value>,
    /// Data category this call serves (used for per-category scheduling
    /// and log correlation). Write commands leave it empty.
    pub category: Option<String>,
}

impl VendorRequest {
    /// A GET request for the given path.
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            query: Vec::new(),
            body: None,
            category: None,
        }
    }

    /// A POST request with a JSON body.
    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            query: Vec::new(),
            body: Some(body),
            category: None,
        }
    }

    /// A PUT request with a JSON body.
    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Put,
            path: path.into(),
            query: Vec::new(),
            body: Some(body),
            category: None,
        }
    }

    /// Tag this request with the data category it fetches.
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Append a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// A successful vendor response: status plus parsed JSON body.
///
/// An empty body (204, or a 200 with no content) is represented as
/// `Value::Null`.
#[derive(Debug, Clone)]
pub struct VendorResponse {
    pub status: u16,
    pub body: Value,
}

impl VendorResponse {
    /// Deserialize the body into a typed value.
    ///
    /// A mismatch is a [`MalformedResponse`](crate::Error::MalformedResponse):
    /// the vendor broke the contract, not the network.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, crate::Error> {
        serde_json::from_value(self.body.clone()).map_err(|e| crate::Error::MalformedResponse {
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[test]
    fn builder_accumulates_query_and_category() {
        let req = VendorRequest::get("devices/42/usage")
            .category("energy")
            .query("granularity", "minute");

        assert_eq!(req.method, Method::Get);
        assert_eq!(req.path, "devices/42/usage");
        assert_eq!(req.category.as_deref(), Some("energy"));
        assert_eq!(req.query, vec![("granularity".to_owned(), "minute".to_owned())]);
        assert!(req.body.is_none());
    }

    #[test]
    fn response_parse_typed() {
        #[derive(Deserialize)]
        struct Usage {
            watts: f64,
        }

        let resp = VendorResponse {
            status: 200,
            body: json!({ "watts": 412.5 }),
        };
        let usage: Usage = resp.parse().expect("valid body");
        assert!((usage.watts - 412.5).abs() < f64::EPSILON);
    }

    #[test]
    fn response_parse_mismatch_is_malformed() {
        let resp = VendorResponse {
            status: 200,
            body: json!({ "unexpected": true }),
        };
        let err = resp.parse::<Vec<String>>().expect_err("shape mismatch");
        assert!(matches!(err, crate::Error::MalformedResponse { .. }));
    }
}
