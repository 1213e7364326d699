use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::token::DatastreamToken;

/// Maximum length of a PID string, namespace and separator included.
pub const MAX_PID_LEN: usize = 64;

/// Persistent identifier of a digital object, `namespace:id`.
///
/// The namespace is drawn from `[A-Za-z0-9.-]`; the id from
/// `[A-Za-z0-9.~_-]` plus `%XX` escapes with upper-case hex. A PID
/// therefore never contains the datastream separator `+`, which keeps
/// datastream tokens unambiguous.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pid(String);

impl Pid {
    /// Parse and validate a PID string.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        validate(s)?;
        Ok(Self(s.to_string()))
    }

    /// The full `namespace:id` string. This is also the object token.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The part before the colon.
    pub fn namespace(&self) -> &str {
        self.split().0
    }

    /// The part after the colon.
    pub fn object_id(&self) -> &str {
        self.split().1
    }

    /// Token for one version of one of this object's datastreams.
    pub fn datastream(
        &self,
        datastream_id: &str,
        version_id: &str,
    ) -> Result<DatastreamToken, TypeError> {
        DatastreamToken::new(self.clone(), datastream_id, version_id)
    }

    fn split(&self) -> (&str, &str) {
        // Validated at construction: exactly one colon is present.
        self.0.split_once(':').unwrap_or((self.0.as_str(), ""))
    }
}

fn validate(s: &str) -> Result<(), TypeError> {
    let invalid = |reason: &str| TypeError::InvalidPid {
        pid: s.to_string(),
        reason: reason.to_string(),
    };

    if s.is_empty() {
        return Err(TypeError::Empty);
    }
    if s.len() > MAX_PID_LEN {
        return Err(invalid(&format!("longer than {MAX_PID_LEN} characters")));
    }
    let (namespace, id) = s.split_once(':').ok_or_else(|| invalid("missing ':'"))?;
    if namespace.is_empty() {
        return Err(invalid("empty namespace"));
    }
    if id.is_empty() {
        return Err(invalid("empty object id"));
    }
    if let Some(ch) = namespace
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '.'))
    {
        return Err(invalid(&format!("namespace contains {ch:?}")));
    }

    let bytes = id.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'%' {
            let escape = bytes.get(i + 1..i + 3);
            let well_formed = escape.is_some_and(|hex| {
                hex.iter()
                    .all(|h| h.is_ascii_digit() || (b'A'..=b'F').contains(h))
            });
            if !well_formed {
                return Err(invalid("object id has a malformed %XX escape"));
            }
            i += 3;
        } else if b.is_ascii_alphanumeric() || b"-._~".contains(&b) {
            i += 1;
        } else {
            return Err(invalid(&format!("object id contains {:?}", b as char)));
        }
    }
    Ok(())
}

impl fmt::Debug for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pid({})", self.0)
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Pid {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Pid {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        validate(&s)?;
        Ok(Self(s))
    }
}

impl From<Pid> for String {
    fn from(pid: Pid) -> Self {
        pid.0
    }
}

impl AsRef<str> for Pid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
