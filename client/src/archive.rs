use std::io::{Cursor, Read};

use serde_json::Value;
use stallmap_shared::is_zip_archive;

use crate::sdk::{MapSource, MapSpace, SpaceId};

const MAX_ENTRY_BYTES: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveEncoding {
    Zip,
    Json,
}

/// A locally decoded map archive, ready to hand to the SDK.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedMap {
    pub encoding: ArchiveEncoding,
    pub spaces: Vec<MapSpace>,
    pub source: MapSource,
}

/// Decode a fetched map archive. Zip is detected by magic number or content type;
/// anything else must be JSON. An archive without spaces is rejected.
pub fn decode_archive(bytes: Vec<u8>, content_type: Option<&str>) -> Result<DecodedMap, String> {
    if bytes.is_empty() {
        return Err("map archive is empty".to_string());
    }

    let (encoding, spaces, source) = if is_zip_archive(&bytes, content_type) {
        let spaces = zip_spaces(&bytes)?;
        (ArchiveEncoding::Zip, spaces, MapSource::Archive(bytes))
    } else {
        let value: Value =
            serde_json::from_slice(&bytes).map_err(|e| format!("map JSON parse error: {e}"))?;
        let mut spaces = Vec::new();
        collect_spaces(&value, &mut spaces);
        (ArchiveEncoding::Json, spaces, MapSource::Json(value))
    };

    if spaces.is_empty() {
        return Err(format!("{encoding:?} map archive contains no spaces"));
    }

    Ok(DecodedMap {
        encoding,
        spaces,
        source,
    })
}

fn zip_spaces(bytes: &[u8]) -> Result<Vec<MapSpace>, String> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| format!("zip error: {e}"))?;

    let mut spaces = Vec::new();
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| format!("zip entry {index}: {e}"))?;
        if !entry.is_file() || !is_space_entry(entry.name()) {
            continue;
        }
        let name = entry.name().to_string();
        if entry.size() > MAX_ENTRY_BYTES {
            return Err(format!("zip entry {name} is too large"));
        }

        let raw = read_limited(&mut entry, MAX_ENTRY_BYTES)
            .map_err(|e| format!("zip entry {name}: {e}"))?;
        let value: Value =
            serde_json::from_str(&raw).map_err(|e| format!("zip entry {name}: {e}"))?;
        collect_spaces(&value, &mut spaces);
    }
    Ok(spaces)
}

/// Reads at most `limit` bytes of UTF-8; the declared entry size is not trusted.
fn read_limited(reader: impl Read, limit: u64) -> Result<String, String> {
    let mut raw = String::new();
    reader
        .take(limit.saturating_add(1))
        .read_to_string(&mut raw)
        .map_err(|e| e.to_string())?;
    if raw.len() as u64 > limit {
        return Err(format!("exceeds {limit} bytes once inflated"));
    }
    Ok(raw)
}

fn is_space_entry(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    (name.ends_with(".json") || name.ends_with(".geojson")) && name.contains("space")
}

/// Accepts `{"spaces": [...]}`, a GeoJSON `FeatureCollection`, or a bare array of spaces.
fn collect_spaces(value: &Value, out: &mut Vec<MapSpace>) {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(object) => {
            if let Some(Value::Array(items)) = object.get("spaces") {
                items
            } else if let Some(Value::Array(features)) = object.get("features") {
                for feature in features {
                    let properties = feature.get("properties").unwrap_or(&Value::Null);
                    let fallback_id = feature.get("id");
                    if let Some(space) = space_from(properties, fallback_id, out.len()) {
                        out.push(space);
                    }
                }
                return;
            } else {
                return;
            }
        }
        _ => return,
    };

    for item in items {
        if let Some(space) = space_from(item, None, out.len()) {
            out.push(space);
        }
    }
}

fn space_from(object: &Value, fallback_id: Option<&Value>, position: usize) -> Option<MapSpace> {
    let object = object.as_object()?;
    let id = object.get("id").or(fallback_id).and_then(scalar_string);
    let name = object.get("name").and_then(scalar_string);
    let slug = object.get("slug").and_then(scalar_string);
    let external_id = object
        .get("externalId")
        .or_else(|| object.get("external_id"))
        .and_then(scalar_string);

    let space_id = id
        .clone()
        .or_else(|| name.clone())
        .unwrap_or_else(|| format!("space-{position}"));

    Some(MapSpace {
        space_id: SpaceId(space_id),
        name,
        id,
        slug,
        external_id,
    })
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};

    use zip::CompressionMethod;
    use zip::write::SimpleFileOptions;

    use super::{ArchiveEncoding, decode_archive, read_limited};
    use crate::sdk::MapSource;

    fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        for (name, body) in entries {
            writer.start_file(*name, options).expect("start zip entry");
            writer.write_all(body.as_bytes()).expect("write zip entry");
        }
        writer.finish().expect("finish zip").into_inner()
    }

    #[test]
    fn decodes_plain_json_spaces_object() {
        let body = br#"{"spaces":[{"id":"s1","name":"A-1"},{"id":"s2","name":"A-2"}]}"#.to_vec();
        let decoded = decode_archive(body, Some("application/json")).expect("decode json");

        assert_eq!(decoded.encoding, ArchiveEncoding::Json);
        assert_eq!(decoded.spaces.len(), 2);
        assert_eq!(decoded.spaces[0].space_id.0, "s1");
        assert_eq!(decoded.spaces[1].name.as_deref(), Some("A-2"));
        assert!(matches!(decoded.source, MapSource::Json(_)));
    }

    #[test]
    fn decodes_bare_array_with_numeric_ids() {
        let body = br#"[{"id":7,"externalId":"FV-3"},{"slug":"m-1"}]"#.to_vec();
        let decoded = decode_archive(body, None).expect("decode array");

        assert_eq!(decoded.spaces[0].id.as_deref(), Some("7"));
        assert_eq!(decoded.spaces[0].match_key(), "7");
        assert_eq!(decoded.spaces[1].space_id.0, "space-1");
        assert_eq!(decoded.spaces[1].match_key(), "m1");
    }

    #[test]
    fn decodes_zip_with_geojson_space_entries() {
        let bytes = zip_with(&[
            ("manifest.json", r#"{"name":"Central Market"}"#),
            (
                "space/floor-1.geojson",
                r#"{"type":"FeatureCollection","features":[
                    {"type":"Feature","properties":{"id":"sp_1","name":"A-1"}},
                    {"type":"Feature","id":"sp_2","properties":{"name":"B-9"}}
                ]}"#,
            ),
        ]);
        let length = bytes.len();

        let decoded = decode_archive(bytes, None).expect("decode zip");

        assert_eq!(decoded.encoding, ArchiveEncoding::Zip);
        assert_eq!(decoded.spaces.len(), 2);
        assert_eq!(decoded.spaces[1].space_id.0, "sp_2");
        assert!(matches!(&decoded.source, MapSource::Archive(bytes) if bytes.len() == length));
    }

    #[test]
    fn reads_stop_at_the_limit_whatever_the_header_claims() {
        let within = read_limited(Cursor::new(b"{\"spaces\":[]}".to_vec()), 64).expect("small entry");
        assert_eq!(within, r#"{"spaces":[]}"#);

        assert_eq!(read_limited(Cursor::new(vec![b'a'; 16]), 16).expect("exact fit").len(), 16);

        let err = read_limited(Cursor::new(vec![b'a'; 17]), 16).expect_err("one byte over");
        assert!(err.contains("16 bytes"));
    }

    #[test]
    fn zip_without_space_entries_is_an_error() {
        let bytes = zip_with(&[("manifest.json", r#"{"spaces":[]}"#)]);
        let err = decode_archive(bytes, Some("application/zip")).expect_err("no spaces");
        assert!(err.contains("no spaces"));
    }

    #[test]
    fn zip_content_type_with_garbage_bytes_is_an_error() {
        let err = decode_archive(b"not a zip".to_vec(), Some("application/zip"))
            .expect_err("garbage zip");
        assert!(err.starts_with("zip error"));
    }

    #[test]
    fn invalid_json_and_empty_payloads_are_errors() {
        assert!(decode_archive(Vec::new(), None).is_err());
        assert!(decode_archive(b"<html>".to_vec(), Some("text/html")).is_err());
        assert!(decode_archive(br#"{"spaces":[]}"#.to_vec(), None).is_err());
    }
}
