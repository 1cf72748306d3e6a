use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

#[derive(thiserror::Error, Debug, PartialEq)]
#[error("invalid build number: {0:?}")]
pub struct InvalidBuildNumber(pub String);

#[derive(thiserror::Error, Debug, PartialEq)]
#[error("invalid version: {0:?}")]
pub struct InvalidVersion(pub String);

/// Numeric version ordinal of a product line, e.g. `15` or `10.5`.
///
/// Whole numbers serialize as JSON integers, anything else as a float.
#[derive(Clone, Copy, Debug)]
pub struct Version(f64);

impl Version {
    pub fn as_f64(self) -> f64 {
        self.0
    }
}

impl From<u32> for Version {
    fn from(v: u32) -> Self {
        Version(v.into())
    }
}

impl FromStr for Version {
    type Err = InvalidVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(Version(v)),
            _ => Err(InvalidVersion(s.to_string())),
        }
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

// 2^53: beyond this an f64 no longer holds every integer exactly.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.0.fract() == 0.0 && self.0.abs() <= MAX_EXACT_INTEGER {
            serializer.serialize_i64(self.0 as i64)
        } else {
            serializer.serialize_f64(self.0)
        }
    }
}

/// A dotted build identifier such as `15.0.4261.1`.
///
/// Components compare numerically and missing trailing components count as
/// zero, so `15.0` and `15.0.0` are equal. The source text is kept and
/// serialized unchanged.
#[derive(Clone, Debug)]
pub struct BuildNumber {
    text: String,
    parts: Vec<u64>,
}

impl BuildNumber {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    fn component(&self, idx: usize) -> u64 {
        self.parts.get(idx).copied().unwrap_or(0)
    }
}

impl FromStr for BuildNumber {
    type Err = InvalidBuildNumber;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        if text.is_empty() {
            return Err(InvalidBuildNumber(s.to_string()));
        }

        let parts = text
            .split('.')
            .map(|part| part.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| InvalidBuildNumber(s.to_string()))?;

        Ok(BuildNumber {
            text: text.to_string(),
            parts,
        })
    }
}

impl Ord for BuildNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        (0..len)
            .map(|i| self.component(i).cmp(&other.component(i)))
            .find(|ord| ord.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for BuildNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for BuildNumber {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for BuildNumber {}

impl fmt::Display for BuildNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl Serialize for BuildNumber {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

/// One row of the source spreadsheet.
///
/// `build` is only parsed for rows that qualify, so it stays `None` for
/// pre-release rows whose build cell is free text.
#[derive(Clone, Debug, PartialEq)]
pub struct BuildRecord {
    pub product_line: String,
    pub version: Option<Version>,
    pub build: Option<BuildNumber>,
    pub release_date: Option<String>,
    pub link: Option<String>,
    pub file_version: Option<String>,
    pub is_ctp: bool,
    pub is_rtm: bool,
}

pub const MIN_VERSION: Version = Version(8.0);

impl BuildRecord {
    pub fn qualifies(&self) -> bool {
        !self.is_ctp && !self.is_rtm && self.version.is_some_and(|v| v >= MIN_VERSION)
    }
}

/// One entry of the derived document. Field names follow the source columns.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LatestBuildEntry {
    #[serde(rename = "SQLServer")]
    pub product_line: String,
    #[serde(rename = "Version")]
    pub version: Version,
    #[serde(rename = "Build")]
    pub build: BuildNumber,
    #[serde(rename = "ReleaseDate")]
    pub release_date: Option<String>,
    #[serde(rename = "Link")]
    pub link: Option<String>,
    #[serde(rename = "FileVersion")]
    pub file_version: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(s: &str) -> BuildNumber {
        s.parse().unwrap()
    }

    #[test]
    fn test_build_number_numeric_ordering() {
        assert!(build("15.0.10.0") > build("15.0.9.0"));
        assert!(build("10.50.6000.34") > build("9.0.5000.0"));
        assert!(build("15.0.4261.1") > build("15.0.2000.5"));
        assert_eq!(build("15.0"), build("15.0.0.0"));
        assert_eq!(build(" 13.0.1601.5 ").as_str(), "13.0.1601.5");
    }

    #[test]
    fn test_build_number_rejects_garbage() {
        assert!("".parse::<BuildNumber>().is_err());
        assert!("15.0.x".parse::<BuildNumber>().is_err());
        assert!("15..1".parse::<BuildNumber>().is_err());
    }

    #[test]
    fn test_version_parsing_and_ordering() {
        let version = |s: &str| s.parse::<Version>().unwrap();

        assert!(version("10.5") > version("10"));
        assert!(version("9") < version("10"));
        assert_eq!(version("15.0"), Version::from(15));
        assert_eq!(version(" 16 "), Version::from(16));
        assert!("".parse::<Version>().is_err());
        assert!("2019 R2".parse::<Version>().is_err());
        assert!("NaN".parse::<Version>().is_err());
        assert!("inf".parse::<Version>().is_err());
    }

    #[test]
    fn test_version_serializes_integers_without_fraction() {
        assert_eq!(serde_json::to_string(&Version::from(15)).unwrap(), "15");
        assert_eq!(serde_json::to_string(&"15.0".parse::<Version>().unwrap()).unwrap(), "15");
        assert_eq!(serde_json::to_string(&"10.5".parse::<Version>().unwrap()).unwrap(), "10.5");
    }

    #[test]
    fn test_qualifies() {
        let record = BuildRecord {
            product_line: "2019".into(),
            version: Some(Version::from(15)),
            build: None,
            release_date: None,
            link: None,
            file_version: None,
            is_ctp: false,
            is_rtm: false,
        };
        assert!(record.qualifies());
        assert!(!BuildRecord { is_ctp: true, ..record.clone() }.qualifies());
        assert!(!BuildRecord { is_rtm: true, ..record.clone() }.qualifies());
        assert!(!BuildRecord { version: Some(Version::from(7)), ..record.clone() }.qualifies());
        assert!(!BuildRecord { version: None, ..record.clone() }.qualifies());
        assert!(BuildRecord { version: Some("8.0".parse().unwrap()), ..record.clone() }.qualifies());
        assert!(BuildRecord { version: Some("10.5".parse().unwrap()), ..record }.qualifies());
    }

    #[test]
    fn test_entry_serializes_source_column_names() {
        let entry = LatestBuildEntry {
            product_line: "2019".into(),
            version: Version::from(15),
            build: build("15.0.4261.1"),
            release_date: Some("2022-09-14".into()),
            link: None,
            file_version: Some("2019.150.4261.1".into()),
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "SQLServer": "2019",
                "Version": 15,
                "Build": "15.0.4261.1",
                "ReleaseDate": "2022-09-14",
                "Link": null,
                "FileVersion": "2019.150.4261.1",
            })
        );
    }
}
