//! Compatibility rewrites for drifted model containers.
//!
//! Models exported by newer toolchains can carry a container format version
//! past what the bundled runtime accepts, and an embedded architecture
//! descriptor whose dtype nodes are tagged with a precision-policy type the
//! runtime no longer knows. Both are fixable without touching the weights:
//! clamp the version field and rewrite the tagged nodes to their plain
//! dtype name, then rebuild the session from the patched bytes.

use serde_json::Value;
use thiserror::Error;

/// ModelProto field holding the container format version (varint).
const IR_VERSION_FIELD: u64 = 1;
/// ModelProto field holding metadata key/value entries (length-delimited).
const METADATA_PROPS_FIELD: u64 = 14;
/// Newest container format version the bundled runtime accepts.
const MAX_SUPPORTED_IR_VERSION: u64 = 10;

/// Class tag the incompatible precision-policy nodes carry in the
/// embedded architecture descriptor.
const PRECISION_POLICY_TAG: &str = "DTypePolicy";

#[derive(Debug, Error)]
pub enum CompatError {
    #[error("malformed model container at byte offset {0}")]
    Malformed(usize),

    #[error("container holds no rewritable compatibility records")]
    NothingToRewrite,
}

/// Rewrite a serialized model container into a form the runtime accepts.
///
/// Walks the top-level protobuf fields, clamping a too-new format version
/// and patching precision-policy nodes inside metadata descriptors. All
/// other fields (the graph and its weights included) are copied verbatim.
/// Fails with [`CompatError::NothingToRewrite`] when nothing needed fixing,
/// so the caller can report that this fallback had nothing to offer.
pub fn rewrite_container(bytes: &[u8]) -> Result<Vec<u8>, CompatError> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut pos = 0usize;
    let mut rewrites = 0usize;

    while pos < bytes.len() {
        let field_start = pos;
        let key = read_varint(bytes, &mut pos).ok_or(CompatError::Malformed(field_start))?;
        let number = key >> 3;
        let wire = (key & 0x7) as u8;

        match wire {
            // varint
            0 => {
                let value =
                    read_varint(bytes, &mut pos).ok_or(CompatError::Malformed(field_start))?;
                if number == IR_VERSION_FIELD && value > MAX_SUPPORTED_IR_VERSION {
                    tracing::debug!(
                        "Clamping container format version {} to {}",
                        value,
                        MAX_SUPPORTED_IR_VERSION
                    );
                    write_varint(&mut out, key);
                    write_varint(&mut out, MAX_SUPPORTED_IR_VERSION);
                    rewrites += 1;
                } else {
                    out.extend_from_slice(&bytes[field_start..pos]);
                }
            }
            // fixed64
            1 => {
                pos = advance(bytes, pos, 8).ok_or(CompatError::Malformed(field_start))?;
                out.extend_from_slice(&bytes[field_start..pos]);
            }
            // length-delimited
            2 => {
                let len =
                    read_varint(bytes, &mut pos).ok_or(CompatError::Malformed(field_start))?;
                let payload_start = pos;
                pos = advance(bytes, pos, len as usize)
                    .ok_or(CompatError::Malformed(field_start))?;

                let patched = if number == METADATA_PROPS_FIELD {
                    rewrite_metadata_entry(&bytes[payload_start..pos])
                } else {
                    None
                };

                match patched {
                    Some(entry) => {
                        write_varint(&mut out, key);
                        write_varint(&mut out, entry.len() as u64);
                        out.extend_from_slice(&entry);
                        rewrites += 1;
                    }
                    None => out.extend_from_slice(&bytes[field_start..pos]),
                }
            }
            // fixed32
            5 => {
                pos = advance(bytes, pos, 4).ok_or(CompatError::Malformed(field_start))?;
                out.extend_from_slice(&bytes[field_start..pos]);
            }
            _ => return Err(CompatError::Malformed(field_start)),
        }
    }

    if rewrites == 0 {
        return Err(CompatError::NothingToRewrite);
    }
    Ok(out)
}

/// Patch one metadata key/value entry, returning the re-encoded entry only
/// if its value held a descriptor that needed rewriting.
fn rewrite_metadata_entry(entry: &[u8]) -> Option<Vec<u8>> {
    let mut pos = 0usize;
    let mut entry_key: Option<&[u8]> = None;
    let mut entry_value: Option<&[u8]> = None;

    while pos < entry.len() {
        let key = read_varint(entry, &mut pos)?;
        if key & 0x7 != 2 {
            // Unexpected entry layout; leave the record untouched.
            return None;
        }
        let len = read_varint(entry, &mut pos)? as usize;
        let start = pos;
        pos = advance(entry, pos, len)?;
        match key >> 3 {
            1 => entry_key = Some(&entry[start..pos]),
            2 => entry_value = Some(&entry[start..pos]),
            _ => return None,
        }
    }

    let value = std::str::from_utf8(entry_value?).ok()?;
    let patched = rewrite_descriptor(value)?;

    let key_bytes: &[u8] = entry_key.unwrap_or(&[]);
    let mut out = Vec::with_capacity(entry.len());
    write_varint(&mut out, (1 << 3) | 2);
    write_varint(&mut out, key_bytes.len() as u64);
    out.extend_from_slice(key_bytes);
    write_varint(&mut out, (2 << 3) | 2);
    write_varint(&mut out, patched.len() as u64);
    out.extend_from_slice(patched.as_bytes());
    Some(out)
}

/// Rewrite precision-policy nodes in a JSON architecture descriptor.
///
/// Returns `None` when the value is not such a descriptor or nothing
/// changed.
fn rewrite_descriptor(raw: &str) -> Option<String> {
    if !raw.contains(PRECISION_POLICY_TAG) {
        return None;
    }
    let descriptor: Value = serde_json::from_str(raw).ok()?;
    let rewritten = strip_precision_policy(descriptor);
    let out = serde_json::to_string(&rewritten).ok()?;
    if out == raw {
        None
    } else {
        Some(out)
    }
}

/// Recursively replace `{"class_name": "DTypePolicy", "config": {"name": N}}`
/// nodes with the plain string `N`.
fn strip_precision_policy(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            if map.get("class_name").and_then(Value::as_str) == Some(PRECISION_POLICY_TAG) {
                let name = map
                    .get("config")
                    .and_then(|config| config.get("name"))
                    .and_then(Value::as_str)
                    .unwrap_or("float32");
                return Value::String(name.to_owned());
            }
            Value::Object(
                map.into_iter()
                    .map(|(key, nested)| (key, strip_precision_policy(nested)))
                    .collect(),
            )
        }
        Value::Array(items) => {
            Value::Array(items.into_iter().map(strip_precision_policy).collect())
        }
        other => other,
    }
}

fn advance(buf: &[u8], pos: usize, len: usize) -> Option<usize> {
    let end = pos.checked_add(len)?;
    (end <= buf.len()).then_some(end)
}

fn read_varint(buf: &[u8], pos: &mut usize) -> Option<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = *buf.get(*pos)?;
        *pos += 1;
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Some(value);
        }
        shift += 7;
        if shift >= 64 {
            return None;
        }
    }
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            out.push(byte | 0x80);
        } else {
            out.push(byte);
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_varint_field(out: &mut Vec<u8>, number: u64, value: u64) {
        write_varint(out, number << 3);
        write_varint(out, value);
    }

    fn push_bytes_field(out: &mut Vec<u8>, number: u64, payload: &[u8]) {
        write_varint(out, (number << 3) | 2);
        write_varint(out, payload.len() as u64);
        out.extend_from_slice(payload);
    }

    fn metadata_entry(key: &str, value: &str) -> Vec<u8> {
        let mut entry = Vec::new();
        push_bytes_field(&mut entry, 1, key.as_bytes());
        push_bytes_field(&mut entry, 2, value.as_bytes());
        entry
    }

    fn read_fields(bytes: &[u8]) -> Vec<(u64, u8, Vec<u8>)> {
        let mut fields = Vec::new();
        let mut pos = 0usize;
        while pos < bytes.len() {
            let key = read_varint(bytes, &mut pos).unwrap();
            let (number, wire) = (key >> 3, (key & 7) as u8);
            match wire {
                0 => {
                    let start = pos;
                    read_varint(bytes, &mut pos).unwrap();
                    fields.push((number, wire, bytes[start..pos].to_vec()));
                }
                2 => {
                    let len = read_varint(bytes, &mut pos).unwrap() as usize;
                    fields.push((number, wire, bytes[pos..pos + len].to_vec()));
                    pos += len;
                }
                _ => panic!("unexpected wire type in test fixture"),
            }
        }
        fields
    }

    #[test]
    fn varint_roundtrip() {
        for value in [0u64, 1, 127, 128, 300, u32::MAX as u64, u64::MAX] {
            let mut buf = Vec::new();
            write_varint(&mut buf, value);
            let mut pos = 0;
            assert_eq!(read_varint(&buf, &mut pos), Some(value));
            assert_eq!(pos, buf.len());
        }
    }

    #[test]
    fn clamps_too_new_format_version() {
        let mut container = Vec::new();
        push_varint_field(&mut container, 1, 12);
        push_bytes_field(&mut container, 7, b"graph-and-weights");

        let patched = rewrite_container(&container).unwrap();
        let fields = read_fields(&patched);

        let mut pos = 0;
        assert_eq!(fields[0].0, 1);
        assert_eq!(read_varint(&fields[0].2, &mut pos), Some(MAX_SUPPORTED_IR_VERSION));
        // The graph blob is untouched.
        assert_eq!(fields[1], (7, 2, b"graph-and-weights".to_vec()));
    }

    #[test]
    fn rewrites_precision_policy_nodes_in_descriptor() {
        let descriptor = r#"{"layers":[{"dtype":{"class_name":"DTypePolicy","config":{"name":"float32"}},"units":64}]}"#;
        let mut container = Vec::new();
        push_varint_field(&mut container, 1, 9);
        push_bytes_field(&mut container, 14, &metadata_entry("model_config", descriptor));

        let patched = rewrite_container(&container).unwrap();
        let fields = read_fields(&patched);
        let entry_fields = read_fields(&fields[1].2);

        assert_eq!(entry_fields[0].2, b"model_config");
        let value = String::from_utf8(entry_fields[1].2.clone()).unwrap();
        let parsed: Value = serde_json::from_str(&value).unwrap();
        assert_eq!(parsed["layers"][0]["dtype"], Value::String("float32".into()));
        assert_eq!(parsed["layers"][0]["units"], 64);
    }

    #[test]
    fn compatible_container_reports_nothing_to_rewrite() {
        let mut container = Vec::new();
        push_varint_field(&mut container, 1, 9);
        push_bytes_field(&mut container, 14, &metadata_entry("producer", "exporter 1.0"));
        push_bytes_field(&mut container, 7, b"graph");

        assert!(matches!(
            rewrite_container(&container),
            Err(CompatError::NothingToRewrite)
        ));
    }

    #[test]
    fn truncated_container_is_malformed() {
        let mut container = Vec::new();
        push_bytes_field(&mut container, 7, b"graph");
        container.truncate(container.len() - 2);

        assert!(matches!(
            rewrite_container(&container),
            Err(CompatError::Malformed(_))
        ));
    }

    #[test]
    fn policy_rewrite_defaults_missing_name_to_float32() {
        let value = serde_json::json!({
            "class_name": "DTypePolicy",
            "config": {}
        });
        assert_eq!(
            strip_precision_policy(value),
            Value::String("float32".into())
        );
    }
}
