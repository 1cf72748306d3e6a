//! Derives the "latest build per product line" document from the builds
//! spreadsheet.
use crate::types::{BuildNumber, BuildRecord, InvalidBuildNumber, LatestBuildEntry, Version};
use indexmap::IndexMap;
use serde::Deserialize;

#[derive(thiserror::Error, Debug)]
pub enum AggregateError {
    #[error("could not read csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("missing required column {0:?}")]
    MissingColumn(&'static str),
    #[error("row {row}: invalid {column} value {value:?}")]
    InvalidFlag {
        row: usize,
        column: &'static str,
        value: String,
    },
    #[error("row {row}: invalid Version value {value:?}")]
    InvalidVersion { row: usize, value: String },
    #[error("row {row}: {source}")]
    InvalidBuild {
        row: usize,
        source: InvalidBuildNumber,
    },
    #[error("could not serialize latest builds: {0}")]
    Serialize(#[from] serde_json::Error),
}

const REQUIRED_COLUMNS: [&str; 8] = [
    "SQLServer",
    "Version",
    "Build",
    "ReleaseDate",
    "Link",
    "FileVersion",
    "CTP",
    "RTM",
];

// Columns are matched by header name; anything else in the sheet is ignored.
#[derive(Deserialize)]
struct SourceRow {
    #[serde(rename = "SQLServer")]
    product_line: String,
    #[serde(rename = "Version")]
    version: String,
    #[serde(rename = "Build")]
    build: String,
    #[serde(rename = "ReleaseDate")]
    release_date: String,
    #[serde(rename = "Link")]
    link: String,
    #[serde(rename = "FileVersion")]
    file_version: String,
    #[serde(rename = "CTP")]
    ctp: String,
    #[serde(rename = "RTM")]
    rtm: String,
}

/// Parses the source CSV. A missing column or any malformed row aborts the
/// whole parse, so an empty body or an HTML page never yields an empty sheet.
pub fn parse_records(csv: &[u8]) -> Result<Vec<BuildRecord>, AggregateError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(csv);

    let headers = reader.headers()?;
    if let Some(column) = REQUIRED_COLUMNS
        .iter()
        .find(|column| !headers.iter().any(|h| h == **column))
    {
        return Err(AggregateError::MissingColumn(*column));
    }

    let mut records = Vec::new();
    for (idx, result) in reader.deserialize::<SourceRow>().enumerate() {
        // 1-based data row, header excluded
        let row = idx + 1;
        let source = result?;

        let mut record = BuildRecord {
            product_line: source.product_line,
            version: parse_version(row, &source.version)?,
            build: None,
            release_date: non_empty(source.release_date),
            link: non_empty(source.link),
            file_version: non_empty(source.file_version),
            is_ctp: parse_flag(row, "CTP", &source.ctp)?,
            is_rtm: parse_flag(row, "RTM", &source.rtm)?,
        };

        record.build = if record.qualifies() {
            let build = source
                .build
                .parse::<BuildNumber>()
                .map_err(|source| AggregateError::InvalidBuild { row, source })?;
            Some(build)
        } else {
            source.build.parse().ok()
        };

        records.push(record);
    }

    Ok(records)
}

/// Picks the highest qualifying build of every product line, ordered by
/// version ascending.
///
/// Descriptive fields come from the first qualifying row (in version order)
/// carrying the product line and its maximum build, so each product line
/// yields exactly one entry even if that build is listed more than once.
pub fn latest_builds(records: &[BuildRecord]) -> Vec<LatestBuildEntry> {
    let mut qualifying: Vec<&BuildRecord> = records.iter().filter(|r| r.qualifies()).collect();
    qualifying.sort_by_key(|r| r.version);

    let mut max_builds: IndexMap<&str, &BuildNumber> = IndexMap::new();
    for record in qualifying.iter().copied() {
        let Some(build) = record.build.as_ref() else {
            continue;
        };
        max_builds
            .entry(record.product_line.as_str())
            .and_modify(|current| {
                if build > *current {
                    *current = build;
                }
            })
            .or_insert(build);
    }

    let mut entries: Vec<LatestBuildEntry> = max_builds
        .into_iter()
        .filter_map(|(product_line, max_build)| {
            let record = qualifying.iter().find(|r| {
                r.product_line == product_line && r.build.as_ref() == Some(max_build)
            })?;

            Some(LatestBuildEntry {
                product_line: record.product_line.clone(),
                version: record.version?,
                build: max_build.clone(),
                release_date: record.release_date.clone(),
                link: record.link.clone(),
                file_version: record.file_version.clone(),
            })
        })
        .collect();

    entries.sort_by_key(|e| e.version);
    entries
}

/// Parses `csv` and renders the latest builds as a JSON array.
pub fn generate_latest_builds_json(csv: &[u8]) -> Result<String, AggregateError> {
    let records = parse_records(csv)?;
    let entries = latest_builds(&records);
    let json = serde_json::to_string(&entries)?;

    tracing::info!(
        rows = records.len(),
        product_lines = entries.len(),
        "generated latest builds document"
    );

    Ok(json)
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

fn parse_flag(row: usize, column: &'static str, value: &str) -> Result<bool, AggregateError> {
    match value.to_ascii_lowercase().as_str() {
        "" | "false" | "no" | "n" | "0" => Ok(false),
        "true" | "yes" | "y" | "1" | "x" => Ok(true),
        _ => Err(AggregateError::InvalidFlag {
            row,
            column,
            value: value.to_string(),
        }),
    }
}

// An empty cell means the row has no ordinal and can never qualify.
fn parse_version(row: usize, value: &str) -> Result<Option<Version>, AggregateError> {
    if value.is_empty() {
        return Ok(None);
    }

    value
        .parse()
        .map(Some)
        .map_err(|_| AggregateError::InvalidVersion {
            row,
            value: value.to_string(),
        })
}
