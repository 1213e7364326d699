use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::encoding::{percent_decode, percent_encode, TOKEN_UNRESERVED};
use crate::error::TypeError;
use crate::pid::Pid;

/// Separator between the PID, datastream id and version id of a token.
pub const DATASTREAM_SEPARATOR: char = '+';

/// Maximum length of a datastream or version id, before encoding.
pub const MAX_SUBFIELD_LEN: usize = 64;

/// Identifies one version of one datastream of a digital object.
///
/// The token form is `pid+enc(datastream_id)+enc(version_id)`. Sub-fields
/// are percent-encoded, so an id that itself contains `+` is stored as
/// `%2B` and the three fields always split unambiguously.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DatastreamToken {
    pid: Pid,
    datastream_id: String,
    version_id: String,
}

impl DatastreamToken {
    /// Build a token from its parts. The ids are taken unencoded.
    pub fn new(pid: Pid, datastream_id: &str, version_id: &str) -> Result<Self, TypeError> {
        check_subfield(datastream_id, "datastream id")?;
        check_subfield(version_id, "version id")?;
        Ok(Self {
            pid,
            datastream_id: datastream_id.to_string(),
            version_id: version_id.to_string(),
        })
    }

    /// Parse a token string produced by [`DatastreamToken::to_token`].
    pub fn parse(token: &str) -> Result<Self, TypeError> {
        let invalid = |reason: String| TypeError::InvalidDatastreamToken {
            token: token.to_string(),
            reason,
        };

        let mut fields = token.split(DATASTREAM_SEPARATOR);
        let (Some(pid), Some(ds), Some(version), None) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(invalid(format!(
                "expected three fields separated by {DATASTREAM_SEPARATOR:?}"
            )));
        };

        let pid = Pid::parse(pid).map_err(|e| invalid(e.to_string()))?;
        let datastream_id = percent_decode(ds).map_err(|e| invalid(e.to_string()))?;
        let version_id = percent_decode(version).map_err(|e| invalid(e.to_string()))?;
        let parsed = Self::new(pid, &datastream_id, &version_id)?;

        // Only the canonical spelling round-trips.
        if parsed.to_token() != token {
            return Err(invalid("sub-fields are not canonically encoded".into()));
        }
        Ok(parsed)
    }

    /// The owning object's PID.
    pub fn pid(&self) -> &Pid {
        &self.pid
    }

    /// The unencoded datastream id.
    pub fn datastream_id(&self) -> &str {
        &self.datastream_id
    }

    /// The unencoded version id.
    pub fn version_id(&self) -> &str {
        &self.version_id
    }

    /// The storage token string.
    pub fn to_token(&self) -> String {
        format!(
            "{pid}{sep}{ds}{sep}{version}",
            pid = self.pid,
            sep = DATASTREAM_SEPARATOR,
            ds = percent_encode(&self.datastream_id, TOKEN_UNRESERVED),
            version = percent_encode(&self.version_id, TOKEN_UNRESERVED),
        )
    }

    /// Prefix shared by every datastream token of `pid`.
    pub fn prefix_for(pid: &Pid) -> String {
        format!("{pid}{DATASTREAM_SEPARATOR}")
    }
}

fn check_subfield(value: &str, what: &str) -> Result<(), TypeError> {
    if value.is_empty() {
        return Err(TypeError::InvalidDatastreamToken {
            token: value.to_string(),
            reason: format!("{what} must not be empty"),
        });
    }
    if value.chars().count() > MAX_SUBFIELD_LEN {
        return Err(TypeError::InvalidDatastreamToken {
            token: value.to_string(),
            reason: format!("{what} longer than {MAX_SUBFIELD_LEN} characters"),
        });
    }
    Ok(())
}

impl fmt::Debug for DatastreamToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DatastreamToken({})", self.to_token())
    }
}

impl fmt::Display for DatastreamToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_token())
    }
}

impl FromStr for DatastreamToken {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for DatastreamToken {
    type Error = TypeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<DatastreamToken> for String {
    fn from(token: DatastreamToken) -> Self {
        token.to_token()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pid() -> Pid {
        Pid::parse("demo:1").unwrap()
    }

    #[test]
    fn token_format() {
        let token = pid().datastream("DC", "DC.0").unwrap();
        assert_eq!(token.to_token(), "demo:1+DC+DC.0");
        assert_eq!(token.to_string(), "demo:1+DC+DC.0");
    }

    #[test]
    fn separator_inside_ids_is_escaped() {
        let token = pid().datastream("A+B", "v+1").unwrap();
        assert_eq!(token.to_token(), "demo:1+A%2BB+v%2B1");

        let parsed = DatastreamToken::parse(&token.to_token()).unwrap();
        assert_eq!(parsed.datastream_id(), "A+B");
        assert_eq!(parsed.version_id(), "v+1");
    }

    #[test]
    fn parse_splits_fields() {
        let token = DatastreamToken::parse("demo:1+RELS-EXT+RELS-EXT.2").unwrap();
        assert_eq!(token.pid().as_str(), "demo:1");
        assert_eq!(token.datastream_id(), "RELS-EXT");
        assert_eq!(token.version_id(), "RELS-EXT.2");
    }

    #[test]
    fn parse_rejects_wrong_field_count() {
        assert!(DatastreamToken::parse("demo:1").is_err());
        assert!(DatastreamToken::parse("demo:1+DC").is_err());
        assert!(DatastreamToken::parse("demo:1+DC+DC.0+extra").is_err());
    }

    #[test]
    fn parse_rejects_empty_fields() {
        assert!(DatastreamToken::parse("demo:1++DC.0").is_err());
        assert!(DatastreamToken::parse("demo:1+DC+").is_err());
    }

    #[test]
    fn parse_rejects_non_canonical_escapes() {
        // `%41` decodes to `A`, which canonical encoding leaves bare.
        assert!(DatastreamToken::parse("demo:1+%41+v").is_err());
    }

    #[test]
    fn new_rejects_overlong_ids() {
        let long = "x".repeat(MAX_SUBFIELD_LEN + 1);
        assert!(pid().datastream(&long, "v").is_err());
        assert!(pid().datastream("DC", &long).is_err());
    }

    #[test]
    fn prefix_matches_every_version() {
        let prefix = DatastreamToken::prefix_for(&pid());
        assert_eq!(prefix, "demo:1+");
        let token = pid().datastream("DC", "DC.3").unwrap().to_token();
        assert!(token.starts_with(&prefix));
        // A different object whose id shares a textual prefix does not match.
        let other = Pid::parse("demo:10").unwrap().datastream("DC", "DC.0").unwrap();
        assert!(!other.to_token().starts_with(&prefix));
    }

    #[test]
    fn serde_as_string() {
        let token = pid().datastream("DC", "DC.0").unwrap();
        let json = serde_json::to_string(&token).unwrap();
        assert_eq!(json, "\"demo:1+DC+DC.0\"");
        let parsed: DatastreamToken = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, token);
    }

    proptest! {
        #[test]
        fn token_roundtrip(ds in "\\PC{1,20}", version in "\\PC{1,20}") {
            let token = pid().datastream(&ds, &version).unwrap();
            let parsed = DatastreamToken::parse(&token.to_token()).unwrap();
            prop_assert_eq!(parsed, token);
        }
    }
}
