//! Batch serialization: newline-delimited JSON, optionally gzip-framed
//! (spec.md §4.8: "serialize to the destination's format (JSONL default,
//! optionally gzipped)").

use crate::event::Event;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;

pub fn jsonl(events: &[Event]) -> Vec<u8> {
    let mut out = Vec::new();
    for event in events {
        let _ = serde_json::to_writer(&mut out, event);
        out.push(b'\n');
    }
    out
}

pub fn serialize_batch(events: &[Event], gzip: bool) -> Vec<u8> {
    let body = jsonl(events);
    if !gzip {
        return body;
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    // Writing to an in-memory Vec<u8> cannot fail.
    encoder.write_all(&body).expect("gzip encode into memory buffer");
    encoder.finish().expect("gzip finish into memory buffer")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jsonl_has_one_line_per_event() {
        let events = vec![Event::from_raw("a"), Event::from_raw("b")];
        let out = String::from_utf8(jsonl(&events)).unwrap();
        assert_eq!(out.lines().count(), 2);
    }

    #[test]
    fn gzip_output_has_gzip_magic_bytes() {
        let events = vec![Event::from_raw("a")];
        let out = serialize_batch(&events, true);
        assert_eq!(&out[0..2], &[0x1f, 0x8b]);
    }
}
