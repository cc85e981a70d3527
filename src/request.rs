use std::io::Read;

use bytes::Bytes;

use crate::{Context, ResilientError, Result};

/// Everything needed to issue one logical request, retries included.
///
/// The body is held in memory so every attempt sends the same bytes.
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    pub method: String,
    pub url: String,
    pub body: Option<Bytes>,
    /// Header pairs; a later value for the same name replaces an earlier one.
    pub headers: Vec<(String, String)>,
    /// Falls back to [`Context::background`] when `None`.
    pub context: Option<Context>,
}

impl RequestOptions {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Reads `reader` to the end and uses the bytes as the body.
    pub fn body_from_reader<R: Read>(mut self, mut reader: R) -> Result<Self> {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).map_err(ResilientError::Body)?;
        self.body = Some(Bytes::from(buf));
        Ok(self)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers
            .extend(headers.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn context(mut self, context: Context) -> Self {
        self.context = Some(context);
        self
    }
}
