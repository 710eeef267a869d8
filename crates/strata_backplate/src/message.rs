// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Wire format for back-plate messages.
//!
//! A message is four fields separated by `|`: the sender's identifier, a
//! one-character action code, the key and the region. A batch is messages
//! joined by `,`. Any `\`, `|` or `,` inside a field is escaped with a
//! backslash so keys and regions may contain arbitrary text. An empty region
//! field means "no region"; blank regions are rejected by the cache before they
//! get here.

use strata_tier::{Error, ErrorKind};

const FIELD_SEPARATOR: char = '|';
const MESSAGE_SEPARATOR: char = ',';
const ESCAPE: char = '\\';

/// What happened on the sending instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BackPlateAction {
    /// A key was written or updated.
    Changed {
        /// The affected key.
        key: String,
        /// The region of the key, if any.
        region: Option<String>,
    },
    /// A key was removed.
    Removed {
        /// The affected key.
        key: String,
        /// The region of the key, if any.
        region: Option<String>,
    },
    /// The whole cache was cleared.
    Clear,
    /// A single region was cleared.
    ClearRegion {
        /// The cleared region.
        region: String,
    },
}

impl BackPlateAction {
    fn code(&self) -> char {
        match self {
            Self::Changed { .. } => 'c',
            Self::Removed { .. } => 'r',
            Self::Clear => 'C',
            Self::ClearRegion { .. } => 'R',
        }
    }

    /// Whether this action supersedes every action queued before it.
    #[must_use]
    pub fn is_clear(&self) -> bool {
        matches!(self, Self::Clear)
    }
}

/// A single back-plate notification together with its sender.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackPlateMessage {
    source: String,
    action: BackPlateAction,
}

impl BackPlateMessage {
    /// Creates a message sent by the instance with the given identifier.
    pub fn new(source: impl Into<String>, action: BackPlateAction) -> Self {
        Self {
            source: source.into(),
            action,
        }
    }

    /// The identifier of the sending instance.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The action carried by this message.
    #[must_use]
    pub fn action(&self) -> &BackPlateAction {
        &self.action
    }

    /// Consumes the message, returning its action.
    #[must_use]
    pub fn into_action(self) -> BackPlateAction {
        self.action
    }

    /// Serializes the message into its wire form.
    #[must_use]
    pub fn encode(&self) -> String {
        let (key, region) = match &self.action {
            BackPlateAction::Changed { key, region } | BackPlateAction::Removed { key, region } => {
                (key.as_str(), region.as_deref().unwrap_or_default())
            }
            BackPlateAction::Clear => ("", ""),
            BackPlateAction::ClearRegion { region } => ("", region.as_str()),
        };

        let mut out = String::with_capacity(self.source.len() + key.len() + region.len() + 8);
        escape_into(&mut out, &self.source);
        out.push(FIELD_SEPARATOR);
        out.push(self.action.code());
        out.push(FIELD_SEPARATOR);
        escape_into(&mut out, key);
        out.push(FIELD_SEPARATOR);
        escape_into(&mut out, region);
        out
    }

    /// Parses a single message from its wire form.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorKind::Transport`] error when the text is not a
    /// well-formed message.
    pub fn decode(raw: &str) -> Result<Self, Error> {
        let fields = split_unescaped(raw, FIELD_SEPARATOR)
            .into_iter()
            .map(unescape)
            .collect::<Vec<_>>();

        let [source, code, key, region] = <[String; 4]>::try_from(fields)
            .map_err(|fields| malformed(raw, format!("expected 4 fields, found {}", fields.len())))?;

        if source.is_empty() {
            return Err(malformed(raw, "missing source identifier"));
        }

        let region = (!region.is_empty()).then_some(region);
        let action = match code.as_str() {
            "c" | "r" if key.is_empty() => return Err(malformed(raw, "missing key")),
            "c" => BackPlateAction::Changed { key, region },
            "r" => BackPlateAction::Removed { key, region },
            "C" => BackPlateAction::Clear,
            "R" => BackPlateAction::ClearRegion {
                region: region.ok_or_else(|| malformed(raw, "missing region"))?,
            },
            other => return Err(malformed(raw, format!("unknown action code '{other}'"))),
        };

        Ok(Self { source, action })
    }
}

/// Joins encoded messages into a single batch payload.
pub fn join_batch<I, S>(messages: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut payload = String::new();
    for (index, message) in messages.into_iter().enumerate() {
        if index > 0 {
            payload.push(MESSAGE_SEPARATOR);
        }
        payload.push_str(message.as_ref());
    }
    payload
}

/// Splits a batch payload into its still-encoded messages.
///
/// Empty entries are skipped.
#[must_use]
pub fn split_batch(payload: &str) -> Vec<&str> {
    split_unescaped(payload, MESSAGE_SEPARATOR)
        .into_iter()
        .filter(|message| !message.is_empty())
        .collect()
}

/// Returns the prefix every encoded message from `source` starts with.
#[must_use]
pub fn source_prefix(source: &str) -> String {
    let mut prefix = String::with_capacity(source.len() + 1);
    escape_into(&mut prefix, source);
    prefix.push(FIELD_SEPARATOR);
    prefix
}

fn malformed(raw: &str, reason: impl std::fmt::Display) -> Error {
    Error::with_kind(ErrorKind::Transport, format!("malformed back-plate message '{raw}': {reason}"))
}

fn escape_into(out: &mut String, field: &str) {
    for c in field.chars() {
        if matches!(c, ESCAPE | FIELD_SEPARATOR | MESSAGE_SEPARATOR) {
            out.push(ESCAPE);
        }
        out.push(c);
    }
}

fn unescape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    let mut chars = field.chars();
    while let Some(c) = chars.next() {
        if c == ESCAPE {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Splits on `separator` wherever it is not preceded by an escape.
fn split_unescaped(text: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;

    for (index, c) in text.char_indices() {
        if escaped {
            escaped = false;
        } else if c == ESCAPE {
            escaped = true;
        } else if c == separator {
            parts.push(&text[start..index]);
            start = index + c.len_utf8();
        }
    }
    parts.push(&text[start..]);
    parts
}
