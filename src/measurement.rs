use std::collections::HashMap;
use std::fmt;
use std::num::{ParseFloatError, ParseIntError};
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

pub const PAIR_SEPARATOR: char = ',';
pub const KEY_VALUE_SEPARATOR: char = '=';

/// One sample reported by the sensor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurement {
    /// CO2 concentration in ppm.
    pub co2: i64,
    /// Relative humidity in %.
    #[serde(rename = "hum")]
    pub humidity: f64,
    /// Temperature in °C.
    #[serde(rename = "temp")]
    pub temperature: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Co2,
    Hum,
    Tmp,
}

impl Field {
    pub fn key(self) -> &'static str {
        match self {
            Field::Co2 => "CO2",
            Field::Hum => "HUM",
            Field::Tmp => "TMP",
        }
    }

    fn parse_int(self, raw: &str) -> Result<i64, ParseError> {
        leading_number(raw, int_len)
            .parse()
            .map_err(|e: ParseIntError| self.error(raw, e.into()))
    }

    fn parse_float(self, raw: &str) -> Result<f64, ParseError> {
        let value: f64 = leading_number(raw, float_len)
            .parse()
            .map_err(|e: ParseFloatError| self.error(raw, e.into()))?;
        if !value.is_finite() {
            return Err(self.error(raw, ValueError::NotFinite));
        }
        Ok(value)
    }

    fn error(self, raw: &str, source: ValueError) -> ParseError {
        ParseError::Field {
            field: self,
            value: raw.to_owned(),
            source,
        }
    }
}

/// Leading number of `raw`, ignoring surrounding whitespace and anything after
/// the number. Without a leading number the trimmed value is returned whole so
/// parsing reports why it is not one.
fn leading_number(raw: &str, len: fn(&[u8]) -> usize) -> &str {
    let trimmed = raw.trim();
    match len(trimmed.as_bytes()) {
        0 => trimmed,
        n => &trimmed[..n],
    }
}

fn int_len(s: &[u8]) -> usize {
    let sign = sign_len(s);
    match digits_len(&s[sign..]) {
        0 => 0,
        digits => sign + digits,
    }
}

fn float_len(s: &[u8]) -> usize {
    let sign = sign_len(s);
    let int = digits_len(&s[sign..]);
    let mut end = sign + int;

    let mut frac = 0;
    if s.get(end) == Some(&b'.') {
        frac = digits_len(&s[end + 1..]);
        end += 1 + frac;
    }
    if int + frac == 0 {
        return 0;
    }

    if matches!(s.get(end), Some(b'e' | b'E')) {
        let exp_sign = sign_len(&s[end + 1..]);
        let exp = digits_len(&s[end + 1 + exp_sign..]);
        if exp > 0 {
            end += 1 + exp_sign + exp;
        }
    }

    end
}

fn sign_len(s: &[u8]) -> usize {
    usize::from(matches!(s.first(), Some(b'+' | b'-')))
}

fn digits_len(s: &[u8]) -> usize {
    s.iter().take_while(|b| b.is_ascii_digit()).count()
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ValueError {
    #[error(transparent)]
    Int(#[from] ParseIntError),
    #[error(transparent)]
    Float(#[from] ParseFloatError),
    #[error("value is not finite")]
    NotFinite,
}

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("invalid data format: {pair:?} is not a KEY=VALUE pair")]
    PairSplit { pair: String },
    #[error("failed to parse {field} value {value:?}: {source}")]
    Field {
        field: Field,
        value: String,
        source: ValueError,
    },
}

impl ParseError {
    pub fn stage(&self) -> &'static str {
        match self {
            ParseError::PairSplit { .. } => "pair-split",
            ParseError::Field { field: Field::Co2, .. } => "co2",
            ParseError::Field { field: Field::Hum, .. } => "hum",
            ParseError::Field { field: Field::Tmp, .. } => "tmp",
        }
    }
}

impl FromStr for Measurement {
    type Err = ParseError;

    /// Parses a line such as `CO2=415,HUM=55.2,TMP=24.0`. Keys may come in
    /// any order, unknown keys are ignored and a repeated key keeps its last
    /// value.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut fields = HashMap::new();
        for pair in line.split(PAIR_SEPARATOR) {
            let mut tokens = pair.split(KEY_VALUE_SEPARATOR);
            let (Some(key), Some(value), None) = (tokens.next(), tokens.next(), tokens.next())
            else {
                return Err(ParseError::PairSplit {
                    pair: pair.to_owned(),
                });
            };
            fields.insert(key, value);
        }

        let raw = |field: Field| fields.get(field.key()).copied().unwrap_or_default();

        Ok(Measurement {
            co2: Field::Co2.parse_int(raw(Field::Co2))?,
            humidity: Field::Hum.parse_float(raw(Field::Hum))?,
            temperature: Field::Tmp.parse_float(raw(Field::Tmp))?,
        })
    }
}
