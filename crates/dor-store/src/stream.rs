//! Connection-owning read handles returned by the storage engine.
//!
//! Both [`BlobReader`] and [`KeyIter`] own the connection they were opened
//! on and close it exactly once. Calling `close` is the intended path; a
//! reader read to EOF and an iterator run to the end close themselves too.
//! `Drop` is only a backstop.

use std::io::{self, Read};

use tracing::warn;

use crate::blob::{BlobConnection, BlobIdIter};
use crate::error::StoreResult;
use crate::keymap::KeyMapper;

/// Byte stream of one stored blob.
pub struct BlobReader {
    key: String,
    inner: Option<Box<dyn Read + Send>>,
    conn: Option<Box<dyn BlobConnection>>,
}

impl BlobReader {
    pub(crate) fn new(
        key: &str,
        inner: Box<dyn Read + Send>,
        conn: Box<dyn BlobConnection>,
    ) -> Self {
        Self {
            key: key.to_string(),
            inner: Some(inner),
            conn: Some(conn),
        }
    }

    /// The token this reader was opened for.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    /// Release the stream and its connection. Later calls do nothing.
    pub fn close(&mut self) {
        self.inner = None;
        if let Some(mut conn) = self.conn.take() {
            conn.close();
        }
    }

    /// Read the remaining content and close.
    pub fn read_to_vec(mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        let result = self.read_to_end(&mut buf);
        self.close();
        result.map(|_| buf)
    }
}

impl Read for BlobReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(0);
        };
        match inner.read(buf) {
            Ok(0) if !buf.is_empty() => {
                self.close();
                Ok(0)
            }
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Err(e),
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }
}

impl Drop for BlobReader {
    fn drop(&mut self) {
        if self.conn.is_some() {
            warn!(key = %self.key, "blob reader dropped without close");
            self.close();
        }
    }
}

impl std::fmt::Debug for BlobReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobReader")
            .field("key", &self.key)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Lazy sequence of stored tokens.
///
/// Safe-overwrite temporaries are skipped. Ids the mapper cannot invert are
/// logged and skipped.
pub struct KeyIter {
    ids: Option<BlobIdIter>,
    conn: Option<Box<dyn BlobConnection>>,
    mapper: KeyMapper,
    token_prefix: Option<String>,
}

impl KeyIter {
    pub(crate) fn new(
        ids: BlobIdIter,
        conn: Box<dyn BlobConnection>,
        mapper: KeyMapper,
        token_prefix: Option<String>,
    ) -> Self {
        Self {
            ids: Some(ids),
            conn: Some(conn),
            mapper,
            token_prefix,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    /// Stop iterating and release the connection.
    pub fn close(&mut self) {
        self.ids = None;
        if let Some(mut conn) = self.conn.take() {
            conn.close();
        }
    }
}

impl Iterator for KeyIter {
    type Item = StoreResult<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let next = self.ids.as_mut()?.next();
            let id = match next {
                None => {
                    self.close();
                    return None;
                }
                Some(Err(e)) => return Some(Err(e)),
                Some(Ok(id)) => id,
            };
            if self.mapper.temporary(&id).is_some() {
                continue;
            }
            match self.mapper.to_external(&id) {
                Ok(token) => {
                    if let Some(prefix) = &self.token_prefix {
                        if !token.starts_with(prefix.as_str()) {
                            continue;
                        }
                    }
                    return Some(Ok(token));
                }
                Err(e) => {
                    warn!(id = %id, error = %e, "skipping unmappable blob id");
                }
            }
        }
    }
}

impl Drop for KeyIter {
    fn drop(&mut self) {
        self.close();
    }
}
