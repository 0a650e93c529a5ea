use serde::{Deserialize, Serialize};

use crate::constants::{CHUNK_FIELD, fields};

/// Errors produced while interpreting an upload form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("missing required form field: {0}")]
    MissingField(&'static str),

    #[error("{0} must be an integer")]
    NotAnInteger(&'static str),

    #[error("invalid chunk index {index} for {total} chunks")]
    InvalidChunkIndex { index: i64, total: i64 },
}

// ---------------------------------------------------------------------------
// Request payloads
// ---------------------------------------------------------------------------

/// Text fields of one chunk-upload request, exactly as they arrive.
///
/// Every field is optional at this layer; [`UploadChunkForm::parse`] decides
/// what is required. `new_folder_name` may be omitted, in which case the
/// engine falls back to its session clock.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadChunkForm {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_folder_name: Option<String>,
}

/// Typed view of an [`UploadChunkForm`] after field validation.
///
/// Path safety is *not* checked here; that belongs to the engine's identity
/// resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFields {
    pub filename: String,
    pub relative_path: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub new_folder_name: Option<String>,
}

impl UploadChunkForm {
    /// Sets a text field by its wire name. The binary [`CHUNK_FIELD`] and
    /// unknown names are ignored.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        if name == CHUNK_FIELD {
            return;
        }
        let value = Some(value.into());
        match name {
            fields::FILENAME => self.filename = value,
            fields::RELATIVE_PATH => self.relative_path = value,
            fields::CHUNK_INDEX => self.chunk_index = value,
            fields::TOTAL_CHUNKS => self.total_chunks = value,
            fields::NEW_FOLDER_NAME => self.new_folder_name = value,
            _ => {}
        }
    }

    /// Validates presence and numeric shape of the fields.
    pub fn parse(&self) -> Result<ChunkFields, ProtocolError> {
        let filename = required(&self.filename, fields::FILENAME)?;
        let relative_path = required(&self.relative_path, fields::RELATIVE_PATH)?;
        let index = integer(required(&self.chunk_index, fields::CHUNK_INDEX)?, fields::CHUNK_INDEX)?;
        let total = integer(required(&self.total_chunks, fields::TOTAL_CHUNKS)?, fields::TOTAL_CHUNKS)?;

        if total <= 0 || index < 0 || index >= total {
            return Err(ProtocolError::InvalidChunkIndex { index, total });
        }
        let (Ok(chunk_index), Ok(total_chunks)) = (u32::try_from(index), u32::try_from(total))
        else {
            return Err(ProtocolError::InvalidChunkIndex { index, total });
        };

        let new_folder_name = self
            .new_folder_name
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Ok(ChunkFields {
            filename: filename.to_string(),
            relative_path: relative_path.to_string(),
            chunk_index,
            total_chunks,
            new_folder_name,
        })
    }
}

fn required<'a>(value: &'a Option<String>, name: &'static str) -> Result<&'a str, ProtocolError> {
    match value.as_deref() {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ProtocolError::MissingField(name)),
    }
}

fn integer(value: &str, name: &'static str) -> Result<i64, ProtocolError> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|_| ProtocolError::NotAnInteger(name))
}

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

/// Success body returned for every accepted chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkReceived {
    pub message: String,
    pub received_count: u32,
    pub total_chunks: u32,
    #[serde(default)]
    pub completed: bool,
}

impl ChunkReceived {
    /// Builds the body for chunk `index` (zero-based) of `total_chunks`.
    pub fn new(index: u32, received_count: u32, total_chunks: u32, completed: bool) -> Self {
        Self {
            message: format!("Chunk {}/{total_chunks} received", u64::from(index) + 1),
            received_count,
            total_chunks,
            completed,
        }
    }
}

/// Failure body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_form() -> UploadChunkForm {
        UploadChunkForm {
            filename: Some("report.csv".into()),
            relative_path: Some("a/b".into()),
            chunk_index: Some("1".into()),
            total_chunks: Some("3".into()),
            new_folder_name: Some("2024-01-01".into()),
        }
    }

    #[test]
    fn parse_full_form() {
        let fields = full_form().parse().unwrap();
        assert_eq!(fields.filename, "report.csv");
        assert_eq!(fields.relative_path, "a/b");
        assert_eq!(fields.chunk_index, 1);
        assert_eq!(fields.total_chunks, 3);
        assert_eq!(fields.new_folder_name.as_deref(), Some("2024-01-01"));
    }

    #[test]
    fn missing_field_is_named() {
        let mut form = full_form();
        form.relative_path = None;
        assert_eq!(
            form.parse().unwrap_err(),
            ProtocolError::MissingField("relativePath")
        );
    }

    #[test]
    fn empty_field_counts_as_missing() {
        let mut form = full_form();
        form.filename = Some(String::new());
        assert_eq!(
            form.parse().unwrap_err(),
            ProtocolError::MissingField("filename")
        );
    }

    #[test]
    fn empty_folder_name_falls_back() {
        let mut form = full_form();
        form.new_folder_name = Some(String::new());
        assert!(form.parse().unwrap().new_folder_name.is_none());
    }

    #[test]
    fn non_numeric_index_rejected() {
        let mut form = full_form();
        form.chunk_index = Some("one".into());
        assert_eq!(
            form.parse().unwrap_err(),
            ProtocolError::NotAnInteger("chunkIndex")
        );
    }

    #[test]
    fn negative_and_overflowing_index_rejected() {
        let mut form = full_form();
        form.chunk_index = Some("-1".into());
        assert!(matches!(
            form.parse().unwrap_err(),
            ProtocolError::InvalidChunkIndex { index: -1, total: 3 }
        ));

        form.chunk_index = Some("3".into());
        assert!(matches!(
            form.parse().unwrap_err(),
            ProtocolError::InvalidChunkIndex { index: 3, total: 3 }
        ));

        form.chunk_index = Some("0".into());
        form.total_chunks = Some("0".into());
        assert!(form.parse().is_err());
    }

    #[test]
    fn set_by_wire_name() {
        let mut form = UploadChunkForm::default();
        form.set("filename", "x.bin");
        form.set("relativePath", "dir");
        form.set("chunkIndex", "0");
        form.set("totalChunks", "1");
        form.set("unknown", "ignored");
        form.set(CHUNK_FIELD, "raw bytes");
        let fields = form.parse().unwrap();
        assert_eq!(fields.filename, "x.bin");
        assert!(fields.new_folder_name.is_none());
    }

    #[test]
    fn chunk_field_is_not_a_text_field() {
        let mut form = UploadChunkForm::default();
        form.set(CHUNK_FIELD, "0");
        assert_eq!(form, UploadChunkForm::default());
    }

    #[test]
    fn error_response_wire_shape() {
        let body = ErrorResponse::new("missing chunk 2");
        assert_eq!(
            serde_json::to_string(&body).unwrap(),
            r#"{"error":"missing chunk 2"}"#
        );
        let back: ErrorResponse = serde_json::from_str(r#"{"error":"x"}"#).unwrap();
        assert_eq!(back, ErrorResponse::new("x"));
    }

    #[test]
    fn form_deserializes_camel_case() {
        let json = r#"{"filename":"f","relativePath":"r","chunkIndex":"0","totalChunks":"2"}"#;
        let form: UploadChunkForm = serde_json::from_str(json).unwrap();
        assert_eq!(form.total_chunks.as_deref(), Some("2"));
        assert!(form.new_folder_name.is_none());
    }

    #[test]
    fn chunk_received_message_is_one_based() {
        let body = ChunkReceived::new(0, 1, 3, false);
        assert_eq!(body.message, "Chunk 1/3 received");
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("\"receivedCount\":1"));
        assert!(json.contains("\"totalChunks\":3"));
    }
}
