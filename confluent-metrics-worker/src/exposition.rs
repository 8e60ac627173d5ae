//! Parser for the Prometheus-style text exposition served by the export API.
//!
//! ```text
//! # HELP confluent_kafka_server_sent_bytes The delta count of bytes sent.
//! # TYPE confluent_kafka_server_sent_bytes gauge
//! confluent_kafka_server_sent_bytes{kafka_id="lkc-1",topic="orders",} 42.0 1700000000000
//! ```
//!
//! A `# HELP` line opens a metric, `# TYPE` sets its type and every sample
//! line adds a measurement to it. The payload is all-or-nothing: any
//! malformed line fails the whole parse.

use std::iter::Peekable;
use std::str::CharIndices;

use chrono::{DateTime, Utc};
use thiserror::Error;

const HELP_PREFIX: &str = "# HELP ";
const TYPE_PREFIX: &str = "# TYPE ";

/// Truncated sample values that fit an INT64 point. Excludes NaN and infinities.
const INT64_RANGE: std::ops::Range<f64> = i64::MIN as f64..-(i64::MIN as f64);

/// A parsed metric and its measurements, in payload order.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub name: String,
    pub description: String,
    pub metric_type: String,
    pub measurements: Vec<Measurement>,
}

/// One sample line.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    /// Label pairs in the order they appeared.
    pub labels: Vec<(String, String)>,
    /// Sample value truncated toward zero.
    pub value: i64,
    pub timestamp: DateTime<Utc>,
}

/// A malformed exposition payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {kind}")]
pub struct ParseError {
    /// 1-based line number.
    pub line: usize,
    pub kind: ParseErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseErrorKind {
    #[error("malformed HELP line")]
    MalformedHelp,
    #[error("TYPE line before any HELP line")]
    TypeWithoutMetric,
    #[error("sample line before any HELP line")]
    SampleWithoutMetric,
    #[error("missing '{{' in sample line")]
    MissingOpenBrace,
    #[error("missing '}}' in sample line")]
    MissingCloseBrace,
    #[error("empty metric name")]
    EmptyName,
    #[error("label '{0}' has no '='")]
    LabelWithoutEquals(String),
    #[error("label with an empty key")]
    EmptyLabelKey,
    #[error("value of label '{0}' is not quoted")]
    UnquotedLabelValue(String),
    #[error("expected '<value> <timestamp>' after labels, found '{0}'")]
    ValueAndTimestamp(String),
    #[error("invalid sample value '{0}'")]
    InvalidValue(String),
    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),
}

/// Parse an exposition payload into metrics.
pub fn parse(text: &str) -> Result<Vec<Metric>, ParseError> {
    let mut metrics = Vec::new();
    let mut open: Option<Metric> = None;

    for (index, raw) in text.lines().enumerate() {
        let at = |kind| ParseError {
            line: index + 1,
            kind,
        };
        let line = raw.trim();

        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix(HELP_PREFIX) {
            let (name, description) = rest
                .split_once(' ')
                .ok_or_else(|| at(ParseErrorKind::MalformedHelp))?;
            if name.is_empty() {
                return Err(at(ParseErrorKind::MalformedHelp));
            }

            if let Some(done) = open.take() {
                metrics.push(done);
            }
            open = Some(Metric {
                name: name.to_string(),
                description: description.trim().to_string(),
                metric_type: String::new(),
                measurements: Vec::new(),
            });
        } else if line.starts_with(TYPE_PREFIX) {
            let metric = open
                .as_mut()
                .ok_or_else(|| at(ParseErrorKind::TypeWithoutMetric))?;
            if let Some((_, metric_type)) = line.rsplit_once(' ') {
                metric.metric_type = metric_type.to_string();
            }
        } else if line.starts_with('#') {
            continue;
        } else {
            let metric = open
                .as_mut()
                .ok_or_else(|| at(ParseErrorKind::SampleWithoutMetric))?;
            metric.measurements.push(parse_sample(line).map_err(at)?);
        }
    }

    if let Some(done) = open {
        metrics.push(done);
    }

    Ok(metrics)
}

fn parse_sample(line: &str) -> Result<Measurement, ParseErrorKind> {
    let open_brace = line.find('{').ok_or(ParseErrorKind::MissingOpenBrace)?;
    if line[..open_brace].trim().is_empty() {
        return Err(ParseErrorKind::EmptyName);
    }

    let (labels, rest) = parse_labels(&line[open_brace + 1..])?;

    let fields: Vec<&str> = rest.split_whitespace().collect();
    let &[value, timestamp] = fields.as_slice() else {
        return Err(ParseErrorKind::ValueAndTimestamp(rest.trim().to_string()));
    };

    let value = value
        .parse::<f64>()
        .ok()
        .map(f64::trunc)
        .filter(|v| INT64_RANGE.contains(v))
        .ok_or_else(|| ParseErrorKind::InvalidValue(value.to_string()))?;

    let timestamp = timestamp
        .parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| ParseErrorKind::InvalidTimestamp(timestamp.to_string()))?;

    Ok(Measurement {
        labels,
        value: value as i64,
        timestamp,
    })
}

/// Parse `k="v",...}` and return the labels plus the text after the brace.
fn parse_labels(input: &str) -> Result<(Vec<(String, String)>, &str), ParseErrorKind> {
    let mut labels = Vec::new();
    let mut chars = input.char_indices().peekable();

    loop {
        skip_whitespace(&mut chars);

        let Some(&(start, c)) = chars.peek() else {
            return Err(ParseErrorKind::MissingCloseBrace);
        };
        if c == '}' {
            return Ok((labels, &input[start + 1..]));
        }

        let key = read_key(input, &mut chars)?;

        skip_whitespace(&mut chars);
        match chars.next() {
            Some((_, '"')) => {}
            _ => return Err(ParseErrorKind::UnquotedLabelValue(key)),
        }
        let value = read_quoted(&mut chars)?;
        labels.push((key, value));

        skip_whitespace(&mut chars);
        match chars.peek() {
            Some(&(_, ',')) => {
                chars.next();
            }
            Some(&(_, '}')) => {}
            _ => return Err(ParseErrorKind::MissingCloseBrace),
        }
    }
}

fn skip_whitespace(chars: &mut Peekable<CharIndices<'_>>) {
    while chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
}

/// Read a label key up to and including its `=`.
fn read_key(input: &str, chars: &mut Peekable<CharIndices<'_>>) -> Result<String, ParseErrorKind> {
    let Some(&(start, _)) = chars.peek() else {
        return Err(ParseErrorKind::MissingCloseBrace);
    };

    for (i, c) in chars.by_ref() {
        match c {
            '=' => {
                let key = input[start..i].trim();
                if key.is_empty() {
                    return Err(ParseErrorKind::EmptyLabelKey);
                }
                return Ok(key.to_string());
            }
            ',' | '}' => {
                return Err(ParseErrorKind::LabelWithoutEquals(
                    input[start..i].trim().to_string(),
                ));
            }
            _ => {}
        }
    }

    Err(ParseErrorKind::LabelWithoutEquals(
        input[start..].trim().to_string(),
    ))
}

/// Read a quoted value after its opening quote, resolving escapes.
fn read_quoted(chars: &mut Peekable<CharIndices<'_>>) -> Result<String, ParseErrorKind> {
    let mut value = String::new();

    while let Some((_, c)) = chars.next() {
        match c {
            '"' => return Ok(value),
            '\\' => match chars.next() {
                Some((_, 'n')) => value.push('\n'),
                Some((_, escaped)) => value.push(escaped),
                None => break,
            },
            _ => value.push(c),
        }
    }

    Err(ParseErrorKind::MissingCloseBrace)
}
