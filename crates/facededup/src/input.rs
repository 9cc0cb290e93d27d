//! Parsing of embedding files and command-line values

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use facededup_engine::{Metadata, MetadataValue};
use serde::Deserialize;
use std::path::Path;

/// Extractor output as written to disk
///
/// Either `{"encodings": [[...], ...]}` (one entry per detected face) or a
/// bare array holding a single embedding.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ExtractionFile {
    Encodings { encodings: Vec<Vec<f32>> },
    Single(Vec<f32>),
}

impl ExtractionFile {
    /// Face encodings in extractor order; empty means no face was found
    pub fn into_encodings(self) -> Vec<Vec<f32>> {
        match self {
            Self::Encodings { encodings } => encodings,
            Self::Single(vector) if vector.is_empty() => Vec::new(),
            Self::Single(vector) => vec![vector],
        }
    }
}

/// Read an extraction file
pub fn read_extraction(path: &Path) -> Result<Vec<Vec<f32>>> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let parsed: ExtractionFile = serde_json::from_str(&data)
        .with_context(|| format!("Invalid extraction file {}", path.display()))?;
    Ok(parsed.into_encodings())
}

/// Parse an inline comma-separated vector
pub fn parse_vector(text: &str) -> Result<Vec<f32>> {
    let trimmed = text.trim().trim_start_matches('[').trim_end_matches(']');
    if trimmed.trim().is_empty() {
        return Ok(Vec::new());
    }

    trimmed
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f32>()
                .with_context(|| format!("Invalid vector component '{}'", part.trim()))
        })
        .collect()
}

/// Parse `key=value` pairs into metadata
///
/// Numbers become numeric values, RFC 3339 strings become timestamps,
/// anything else is kept as text.
pub fn parse_metadata(pairs: &[String]) -> Result<Metadata> {
    let mut metadata = Metadata::new();

    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("Metadata must be key=value, got '{}'", pair);
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("Metadata key cannot be empty in '{}'", pair);
        }
        metadata.insert(key, parse_metadata_value(value.trim()));
    }

    Ok(metadata)
}

fn parse_metadata_value(value: &str) -> MetadataValue {
    if let Ok(number) = value.parse::<f64>() {
        if number.is_finite() {
            return MetadataValue::Number(number);
        }
    }
    if let Ok(time) = DateTime::parse_from_rfc3339(value) {
        return MetadataValue::Time(time.with_timezone(&Utc));
    }
    MetadataValue::Text(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_vector() {
        assert_eq!(parse_vector("1, 0.5,-2").unwrap(), vec![1.0, 0.5, -2.0]);
        assert_eq!(parse_vector("[0.1,0.2]").unwrap(), vec![0.1, 0.2]);
        assert!(parse_vector("").unwrap().is_empty());
        assert!(parse_vector("1,abc").is_err());
    }

    #[test]
    fn test_parse_metadata() {
        let meta = parse_metadata(&[
            "filename=alice.jpg".to_string(),
            "faces=2".to_string(),
            "taken_at=2024-05-01T10:00:00Z".to_string(),
        ])
        .unwrap();

        assert_eq!(
            meta.get("filename"),
            Some(&MetadataValue::Text("alice.jpg".to_string()))
        );
        assert_eq!(meta.get("faces"), Some(&MetadataValue::Number(2.0)));
        assert!(matches!(meta.get("taken_at"), Some(MetadataValue::Time(_))));

        assert!(parse_metadata(&["novalue".to_string()]).is_err());
        assert!(parse_metadata(&["=x".to_string()]).is_err());
    }

    #[test]
    fn test_read_extraction_formats() {
        let dir = tempfile::tempdir().unwrap();

        let multi = dir.path().join("multi.json");
        let mut file = std::fs::File::create(&multi).unwrap();
        write!(file, "{{\"encodings\": [[1.0, 0.0], [0.0, 1.0]]}}").unwrap();
        assert_eq!(read_extraction(&multi).unwrap().len(), 2);

        let none = dir.path().join("none.json");
        std::fs::write(&none, "{\"encodings\": []}").unwrap();
        assert!(read_extraction(&none).unwrap().is_empty());

        let single = dir.path().join("single.json");
        std::fs::write(&single, "[0.5, 0.5]").unwrap();
        assert_eq!(read_extraction(&single).unwrap(), vec![vec![0.5, 0.5]]);

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{").unwrap();
        assert!(read_extraction(&broken).is_err());
    }
}
