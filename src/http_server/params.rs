//! Query-string access that never rejects a request on its own.
//!
//! Parameters are extracted as raw key/value pairs so that repeated keys and
//! odd encodings reach the handlers, which answer with a JSON `{error}` or a
//! dashboard banner as appropriate.

use axum::extract::{rejection::QueryRejection, Query};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ParamError {
    #[error("malformed query string")]
    Malformed,
    #[error("'{0}' was given more than once")]
    Repeated(&'static str),
}

pub type RawPairs = Result<Query<Vec<(String, String)>>, QueryRejection>;

#[derive(Debug, Default)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    pub fn extract(raw: RawPairs) -> Result<Self, ParamError> {
        match raw {
            Ok(Query(pairs)) => Ok(QueryParams { pairs }),
            Err(rejection) => {
                tracing::debug!(%rejection, "unreadable query string");
                Err(ParamError::Malformed)
            }
        }
    }

    /// Value of a key that may appear at most once.
    pub fn one(&self, key: &'static str) -> Result<Option<&str>, ParamError> {
        let mut values = self
            .pairs
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str());
        let first = values.next();
        if first.is_some() && values.next().is_some() {
            return Err(ParamError::Repeated(key));
        }
        Ok(first)
    }

    /// First value of a key, repeats ignored. Used for format flags.
    pub fn first(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}
