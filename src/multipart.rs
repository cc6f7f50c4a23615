use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::{Stream, StreamExt};
use reqwest::multipart::{Form, Part};
use reqwest::Body;

use crate::error::{Error, Result};
use crate::handle::Progress;
use crate::transport::ProgressSink;

/// Size of the chunks a file part is streamed in
const UPLOAD_CHUNK_SIZE: usize = 16 * 1024;

/// MIME types of common upload payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MimeType {
    Jpeg,
    Png,
    Gif,
    Heic,
    Heif,
    Webp,
    Tif,
    Json,
}

impl MimeType {
    /// Get the MIME type string
    pub fn as_str(&self) -> &'static str {
        match self {
            MimeType::Jpeg => "image/jpeg",
            MimeType::Png => "image/png",
            MimeType::Gif => "image/gif",
            MimeType::Heic => "image/heic",
            MimeType::Heif => "image/heif",
            MimeType::Webp => "image/webp",
            MimeType::Tif => "image/tif",
            MimeType::Json => "application/json",
        }
    }

    /// Guess the MIME type from a file extension
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_lowercase().as_str() {
            "jpg" | "jpeg" => Some(MimeType::Jpeg),
            "png" => Some(MimeType::Png),
            "gif" => Some(MimeType::Gif),
            "heic" => Some(MimeType::Heic),
            "heif" => Some(MimeType::Heif),
            "webp" => Some(MimeType::Webp),
            "tif" | "tiff" => Some(MimeType::Tif),
            "json" => Some(MimeType::Json),
            _ => None,
        }
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One file part of a multipart upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormPart {
    data: Vec<u8>,
    name: String,
    file_name: String,
    mime_type: String,
}

impl FormPart {
    /// Create a part with an explicit MIME type string
    pub fn new(
        data: Vec<u8>,
        name: impl Into<String>,
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            data,
            name: name.into(),
            file_name: file_name.into(),
            mime_type: mime_type.into(),
        }
    }

    /// Create a part with one of the common MIME types
    pub fn with_type(
        data: Vec<u8>,
        name: impl Into<String>,
        file_name: impl Into<String>,
        mime_type: MimeType,
    ) -> Self {
        Self::new(data, name, file_name, mime_type.as_str())
    }

    /// Read a part from disk, taking the file name from the path and guessing
    /// the MIME type from its extension
    pub fn from_file(name: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::multipart(format!("File not found: {}", path.display())));
        }

        let data = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("file")
            .to_string();
        let mime_type = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(MimeType::from_extension)
            .map(|mime| mime.as_str())
            .unwrap_or("application/octet-stream");

        Ok(Self::new(data, name, file_name, mime_type))
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }
}

/// Text fields and file parts of a `multipart/form-data` upload.
///
/// The wire encoding, boundary included, is left to reqwest when the body is
/// turned into a [`Form`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultipartBody {
    fields: Vec<(String, String)>,
    parts: Vec<FormPart>,
}

impl MultipartBody {
    /// Create a body; fields are written before parts, both in order
    pub fn new(fields: Vec<(String, String)>, parts: Vec<FormPart>) -> Self {
        Self { fields, parts }
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    pub fn parts(&self) -> &[FormPart] {
        &self.parts
    }

    /// Total size of the file parts in bytes, the basis of upload progress
    pub fn payload_len(&self) -> usize {
        self.parts.iter().map(|part| part.data.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.parts.is_empty()
    }

    /// Build the reqwest form.
    ///
    /// With a progress sink every file part is streamed in chunks and each
    /// chunk is reported against [`payload_len`](Self::payload_len).
    pub fn into_form(self, progress: Option<ProgressSink>) -> Result<Form> {
        let total = self.payload_len() as u64;
        let sent = Arc::new(AtomicU64::new(0));

        let mut form = Form::new();
        for (name, value) in self.fields {
            form = form.text(name, value);
        }

        for part in self.parts {
            let FormPart {
                data,
                name,
                file_name,
                mime_type,
            } = part;

            let body = match &progress {
                Some(sink) => {
                    let length = data.len() as u64;
                    let stream = progress_chunks(data, sink.clone(), sent.clone(), total);
                    Part::stream_with_length(Body::wrap_stream(stream), length)
                }
                None => Part::bytes(data),
            };
            form = form.part(name, body.file_name(file_name).mime_str(&mime_type)?);
        }

        Ok(form)
    }
}

/// Split `data` into chunks, reporting the running total as each one is polled
fn progress_chunks(
    data: Vec<u8>,
    sink: ProgressSink,
    sent: Arc<AtomicU64>,
    total: u64,
) -> impl Stream<Item = std::io::Result<Vec<u8>>> + Send + Sync + 'static {
    let chunks: Vec<Vec<u8>> = data.chunks(UPLOAD_CHUNK_SIZE).map(<[u8]>::to_vec).collect();

    futures::stream::iter(chunks).map(move |chunk| {
        let length = chunk.len() as u64;
        let completed = sent.fetch_add(length, Ordering::Relaxed) + length;
        sink(Progress { completed, total });
        Ok::<_, std::io::Error>(chunk)
    })
}
