//! Stage-chain parsers (spec.md §4.3, C3).
//!
//! Each parser is a pure `(event, ctx) -> Result<(), ParseError>` transform:
//! it mutates the event in place, never touches `_raw`, and is idempotent —
//! running it twice on an already-parsed event is a no-op, not a double
//! application. Dispatch mirrors the teacher's
//! `TransformationManager::{parsers, register_parser}` table (see
//! other_examples/siem_unified_pipeline).

pub mod paloalto_csv;
pub mod versa_kvp;

use crate::error::ParseError;
use crate::event::Event;
use crate::model::ParseMode;
use chrono::{DateTime, Utc};

/// Meta key set by both parsers naming the parser that ran.
pub const META_PARSER: &str = "_parser";
/// Meta key set by both parsers with the wall-clock time parsing completed.
pub const META_PARSED_AT: &str = "_parsed_at";
/// Meta key set by the stage executor (not the parser) when a strict-mode
/// parse fails, per spec.md §7.
pub const META_PARSE_ERROR: &str = "_parse_error";

/// Per-call parser context: strictness plus the wall-clock reading to stamp
/// onto `_parsed_at`, supplied by the injected [`crate::clock::Clock`]
/// rather than read directly so parsers stay suspension-free and
/// deterministic under test.
#[derive(Debug, Clone, Copy)]
pub struct ParseContext {
    pub mode: ParseMode,
    pub now: DateTime<Utc>,
}

/// A named, stateless parser.
pub trait Parser: Send + Sync {
    fn name(&self) -> &'static str;
    fn parse(&self, event: &mut Event, ctx: ParseContext) -> Result<(), ParseError>;
}

/// Lookup table from parser name to implementation, used by the stage
/// executor to dispatch `parse_versa_kvp` / `parse_paloalto_csv` stages.
pub struct ParserRegistry {
    parsers: std::collections::HashMap<&'static str, Box<dyn Parser>>,
}

impl ParserRegistry {
    pub fn new() -> Self {
        let mut parsers: std::collections::HashMap<&'static str, Box<dyn Parser>> =
            std::collections::HashMap::new();
        let versa = versa_kvp::VersaKvpParser;
        let paloalto = paloalto_csv::PaloAltoCsvParser;
        parsers.insert(versa.name(), Box::new(versa));
        parsers.insert(paloalto.name(), Box::new(paloalto));
        Self { parsers }
    }

    pub fn get(&self, name: &str) -> Option<&dyn Parser> {
        self.parsers.get(name).map(|b| b.as_ref())
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}
