//! `multipart/form-data` parsing for track uploads, with hard limits on
//! part count and sizes. Everything is buffered in memory.

use std::io::{self, Read};

use log::debug;
use multipart::server::Multipart;
use rouille::Request;

use crate::{
    config::UploadConfig,
    pipeline::{error::PipelineError, upload::UploadForm},
};

pub const FILE_FIELD: &str = "track";
pub const NAME_FIELD: &str = "name";

const MAX_FIELD_BYTES: u64 = 1024 * 1024;
/// trailing bytes accepted after the closing delimiter (CRLF, padding)
const MAX_EPILOGUE_BYTES: u64 = 1024;

#[derive(Debug, Clone)]
pub struct UploadLimits {
    pub max_parts: usize,
    pub max_files: usize,
    pub max_fields: usize,
    pub max_file_bytes: u64,
    pub max_field_bytes: u64,
}

impl From<&UploadConfig> for UploadLimits {
    fn from(config: &UploadConfig) -> Self {
        Self {
            max_parts: 2,
            max_files: 1,
            max_fields: 1,
            max_file_bytes: config.max_file_bytes,
            max_field_bytes: MAX_FIELD_BYTES,
        }
    }
}

fn rejected(reason: impl std::fmt::Display) -> PipelineError {
    PipelineError::validation(format!("Upload Request Validation Failed: {reason}"))
}

/// Reads `limit + 1` bytes at most, so an oversized part is detected without
/// buffering all of it.
fn read_limited<R: Read>(data: R, limit: u64) -> Result<Option<Vec<u8>>, PipelineError> {
    let mut buf = Vec::new();
    data.take(limit.saturating_add(1))
        .read_to_end(&mut buf)
        .map_err(|e| rejected(format!("Unreadable part: {e}")))?;

    if buf.len() as u64 > limit {
        return Ok(None);
    }
    Ok(Some(buf))
}

/// `boundary` parameter of a `multipart/form-data` content type
fn boundary(request: &Request) -> Result<String, PipelineError> {
    let content_type = request
        .header("Content-Type")
        .ok_or_else(|| rejected("Missing Content-Type"))?;

    let mut params = content_type.split(';').map(str::trim);
    let is_form = params
        .next()
        .is_some_and(|mime| mime.eq_ignore_ascii_case("multipart/form-data"));
    if !is_form {
        return Err(rejected(format!("Unsupported Content-Type '{content_type}'")));
    }

    params
        .find_map(|param| param.strip_prefix("boundary="))
        .map(|b| b.trim_matches('"').to_string())
        .filter(|b| !b.is_empty())
        .ok_or_else(|| rejected("Missing multipart boundary"))
}

/// Passes reads through, remembering the last `keep` bytes seen.
struct TailReader<R> {
    inner: R,
    tail: Vec<u8>,
    keep: usize,
}

impl<R: Read> Read for TailReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.tail.extend_from_slice(&buf[..n]);
        if self.tail.len() > self.keep {
            let excess = self.tail.len() - self.keep;
            self.tail.drain(..excess);
        }
        Ok(n)
    }
}

impl<R: Read> TailReader<R> {
    /// Reads the rest of the body and checks it ended with the closing
    /// delimiter. A body cut short never does.
    fn finish(mut self, boundary: &str) -> Result<(), PipelineError> {
        let rest = io::copy(
            &mut (&mut self).take(MAX_EPILOGUE_BYTES + 1),
            &mut io::sink(),
        )
        .map_err(|e| rejected(format!("Unreadable body: {e}")))?;
        if rest > MAX_EPILOGUE_BYTES {
            return Err(rejected("Unexpected data after the closing boundary"));
        }

        let closing = format!("--{boundary}--");
        if !self.tail.trim_ascii_end().ends_with(closing.as_bytes()) {
            return Err(rejected("Request body ended before the closing boundary"));
        }
        Ok(())
    }
}

/// Collects the `name` text field and the `track` file part.
///
/// A part carrying a filename counts as a file. Text fields other than `name`
/// count against the field limit but are otherwise ignored. Missing parts are
/// left as `None` for the upload pipeline to report. A malformed or truncated
/// body is rejected as a whole.
pub fn parse_upload_form(
    request: &Request,
    limits: &UploadLimits,
) -> Result<UploadForm, PipelineError> {
    let boundary = boundary(request)?;
    let body = request
        .data()
        .ok_or_else(|| rejected("Request body was already consumed"))?;

    let mut body = TailReader {
        inner: body,
        tail: Vec::new(),
        keep: boundary.len() + 4 + MAX_EPILOGUE_BYTES as usize,
    };
    let form = read_form(Multipart::with_body(&mut body, boundary.as_str()), limits)?;
    body.finish(&boundary)?;

    Ok(form)
}

fn read_form<R: Read>(
    mut multipart: Multipart<R>,
    limits: &UploadLimits,
) -> Result<UploadForm, PipelineError> {
    let mut form = UploadForm::default();
    let (mut parts, mut files, mut fields) = (0usize, 0usize, 0usize);

    while let Some(mut field) = multipart
        .read_entry()
        .map_err(|e| rejected(format!("Malformed multipart body: {e}")))?
    {
        parts += 1;
        if parts > limits.max_parts {
            return Err(rejected("Too many parts"));
        }

        let field_name = field.headers.name.to_string();

        if field.headers.filename.is_some() {
            files += 1;
            if files > limits.max_files {
                return Err(rejected("Too many files"));
            }
            if field_name != FILE_FIELD {
                return Err(rejected(format!("Unexpected field '{field_name}'")));
            }

            let data = read_limited(&mut field.data, limits.max_file_bytes)?
                .ok_or_else(|| rejected("File too large"))?;
            debug!("upload part '{field_name}': {} bytes", data.len());
            form.track = Some(data);
        } else {
            fields += 1;
            if fields > limits.max_fields {
                return Err(rejected("Too many fields"));
            }

            let data = read_limited(&mut field.data, limits.max_field_bytes)?
                .ok_or_else(|| rejected("Field value too long"))?;
            if field_name == NAME_FIELD {
                let value = String::from_utf8(data)
                    .map_err(|_| rejected("Field value is not valid UTF-8"))?;
                form.name = Some(value);
            }
        }
    }

    Ok(form)
}
