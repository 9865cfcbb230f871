//! A small content-type ⇔ file-extension table for key-value records.
//!
//! The remote service writes a companion metadata file when a content-type
//! can't be inferred from the extension alone; we keep this local emulator
//! simple and always resolve through this fixed table, falling back to
//! `.bin` for anything unrecognized.

const TABLE: &[(&str, &str)] = &[
    ("application/json", "json"),
    ("text/plain", "txt"),
    ("text/html", "html"),
    ("text/csv", "csv"),
    ("text/xml", "xml"),
    ("application/xml", "xml"),
    ("application/pdf", "pdf"),
    ("application/octet-stream", "bin"),
    ("image/png", "png"),
    ("image/jpeg", "jpg"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
    ("image/svg+xml", "svg"),
];

const DEFAULT_EXTENSION: &str = "bin";
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

pub fn extension_for(content_type: &str) -> &'static str {
    let bare = content_type.split(';').next().unwrap_or(content_type).trim();
    TABLE
        .iter()
        .find(|(ct, _)| ct.eq_ignore_ascii_case(bare))
        .map(|(_, ext)| *ext)
        .unwrap_or(DEFAULT_EXTENSION)
}

pub fn content_type_for(extension: &str) -> &'static str {
    TABLE
        .iter()
        .find(|(_, ext)| ext.eq_ignore_ascii_case(extension))
        .map(|(ct, _)| *ct)
        .unwrap_or(DEFAULT_CONTENT_TYPE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_known_types() {
        assert_eq!(extension_for("application/json"), "json");
        assert_eq!(content_type_for("json"), "application/json");
    }

    #[test]
    fn unknown_type_falls_back_to_bin() {
        assert_eq!(extension_for("application/x-made-up"), "bin");
    }

    #[test]
    fn content_type_with_charset_is_still_recognized() {
        assert_eq!(extension_for("application/json; charset=utf-8"), "json");
    }
}
