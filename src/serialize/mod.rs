//! BEL encoder: the versioned, semicolon-delimited, string-interned wire
//! format for finalized request records.
//!
//! Numbers are base36. Strings go through a per-call intern table: the first
//! occurrence is written as an escaped literal, later occurrences as `#`
//! followed by the base36 table index. `None` encodes as an empty field.

use std::collections::BTreeMap;

use crate::aggregate::records::RequestRecord;

const SCHEMA_TAG: &str = "bel.7";

/// Encodes a batch of records into one BEL payload. Empty batch means no
/// payload at all, not an empty one.
pub fn serialize(records: &[RequestRecord], time_origin: f64) -> Option<String> {
    if records.is_empty() {
        return None;
    }
    let mut out = String::from(SCHEMA_TAG);
    let mut interner = Interner::default();
    for record in records {
        out.push(';');
        encode_record(&mut out, record, time_origin, &mut interner);
    }
    Some(out)
}

fn encode_record(out: &mut String, record: &RequestRecord, time_origin: f64, interner: &mut Interner) {
    let mut attrs: BTreeMap<String, String> = record.attrs.clone();
    if let Some(gql) = &record.gql {
        attrs.insert("operationName".to_string(), gql.operation_name.clone());
        attrs.insert("operationType".to_string(), gql.operation_type.clone());
    }

    let mut fields: Vec<String> = Vec::with_capacity(15 + attrs.len() * 2);
    fields.push(base36((record.start_ms - time_origin).max(0.0)));
    fields.push(base36((record.end_ms - record.start_ms).max(0.0)));
    // Pre-correlation slots, zero until a correlating consumer fills them.
    fields.push("0".to_string());
    fields.push("0".to_string());
    fields.push(interner.encode(&record.method));
    fields.push(interner.encode(&domain_of(record)));
    fields.push(interner.encode(&record.path));
    fields.push(record.request_size.map(|n| base36(n as f64)).unwrap_or_default());
    fields.push(record.response_size.map(|n| base36(n as f64)).unwrap_or_default());
    fields.push(base36(record.callback_ms));
    fields.push(interner.encode(record.kind.as_str()));
    fields.push(
        record
            .span_id
            .as_deref()
            .map(|s| interner.encode(s))
            .unwrap_or_default(),
    );
    fields.push(
        record
            .trace_id
            .as_deref()
            .map(|s| interner.encode(s))
            .unwrap_or_default(),
    );
    fields.push(record.trace_ms.map(base36).unwrap_or_default());
    fields.push(base36(attrs.len() as f64));
    for (key, value) in &attrs {
        fields.push(interner.encode(key));
        fields.push(interner.encode(value));
    }

    out.push_str(&base36(fields.len() as f64));
    for field in fields {
        out.push(',');
        out.push_str(&field);
    }
}

fn domain_of(record: &RequestRecord) -> String {
    if record.port.is_empty() {
        record.hostname.clone()
    } else {
        format!("{}:{}", record.hostname, record.port)
    }
}

/// Per-call string table. Indices are assignment order, starting at zero.
#[derive(Default)]
struct Interner {
    table: Vec<String>,
}

impl Interner {
    fn encode(&mut self, value: &str) -> String {
        if let Some(index) = self.table.iter().position(|v| v == value) {
            return format!("#{}", base36(index as f64));
        }
        self.table.push(value.to_string());
        escape(value)
    }
}

/// Backslash-escapes the characters that carry structure on the wire.
fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, ',' | ';' | '#' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Lowercase base36 of a non-negative value, rounded to the nearest integer.
fn base36(value: f64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut n = value.round().max(0.0) as u64;
    if n == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::new();
    while n > 0 {
        buf.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    buf.reverse();
    String::from_utf8_lossy(&buf).into_owned()
}
