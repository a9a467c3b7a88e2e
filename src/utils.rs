use percent_encoding::percent_decode_str;
use url::Url;

use crate::error::{TransferError, TransferResult};

const ARCHIVE_TYPES: &[&str] = &["application/zip", "application/java-archive"];
const GENERIC_TYPES: &[&str] = &["application/octet-stream", "text/plain", "text/xml"];

/// Last non-empty path segment of `url`, percent-decoded, query string
/// excluded.
pub fn get_filename_from_url(url_str: &str) -> Option<String> {
    let url = Url::parse(url_str).ok()?;
    let segment = url.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let decoded = percent_decode_str(segment).decode_utf8_lossy();
    (!decoded.is_empty()).then(|| decoded.into_owned())
}

/// Split header parameters on `;`, leaving separators inside quoted strings
/// alone.
fn split_params(value: &str) -> Vec<&str> {
    let mut params = vec![];
    let mut in_quotes = false;
    let mut escaped = false;
    let mut start = 0;
    for (i, c) in value.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                params.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    params.push(&value[start..]);
    params
}

fn unquote(value: &str) -> String {
    let value = value.trim();
    match value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        Some(inner) => {
            let mut out = String::with_capacity(inner.len());
            let mut chars = inner.chars();
            while let Some(c) = chars.next() {
                if c == '\\' {
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                } else {
                    out.push(c);
                }
            }
            out
        }
        None => value.to_string(),
    }
}

/// Decode an RFC 5987 `charset'language'value` parameter.
fn decode_ext_value(value: &str) -> Option<String> {
    let value = unquote(value);
    let mut parts = value.splitn(3, '\'');
    let charset = parts.next()?;
    let _language = parts.next()?;
    let encoded = parts.next()?;
    let bytes = percent_decode_str(encoded);
    if charset.eq_ignore_ascii_case("utf-8") {
        bytes.decode_utf8().ok().map(|s| s.into_owned())
    } else {
        // ISO-8859-1 maps byte for byte onto the first 256 code points.
        Some(bytes.map(char::from).collect())
    }
}

/// File name of a `Content-Disposition` value. `filename*` wins over
/// `filename`.
pub fn filename_from_disposition(disposition: &str) -> Option<String> {
    let mut plain = None;
    let mut extended = None;
    for param in split_params(disposition).into_iter().skip(1) {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.eq_ignore_ascii_case("filename*") {
            extended = decode_ext_value(value);
        } else if key.eq_ignore_ascii_case("filename") {
            plain = Some(unquote(value));
        }
    }
    extended
        .or(plain)
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
}

fn mime_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Pick a file name for a response.
///
/// Archives take the `Content-Disposition` name, generic binary/text types
/// take the last URL segment, anything else keeps `default_name`.
pub fn suggest_file_name(
    content_type: Option<&str>,
    disposition: Option<&str>,
    url: &str,
    default_name: &str,
) -> String {
    let essence = content_type.map(mime_essence).unwrap_or_default();
    let suggested = if ARCHIVE_TYPES.contains(&essence.as_str()) {
        disposition.and_then(filename_from_disposition)
    } else if GENERIC_TYPES.contains(&essence.as_str()) {
        get_filename_from_url(url)
    } else {
        None
    };
    suggested.unwrap_or_else(|| default_name.to_string())
}

pub fn sanitize_filename(filename: &str) -> String {
    filename.replace(|c: char| !c.is_ascii_alphanumeric() && c != '.' && c != '-' && c != '_', "_")
}

/// Sanitize a name for use as a single path component.
pub fn safe_component(name: &str) -> TransferResult<String> {
    let cleaned = sanitize_filename(name.trim());
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        return Err(TransferError::InvalidFileName(name.to_string()));
    }
    Ok(cleaned)
}
