use anyhow::Result;

use crate::rootfile::{buffer::ReadBuffer, codec::Value};

/// Range parameters for a bit-packed `Double32_t`, parsed from the member
/// title (`"[xmin,xmax,nbits]"`). Without parameters the value is stored as
/// a plain float32.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Double32 {
    pub params: Option<(f64, f64, u32)>,
}

impl Double32 {
    pub fn plain() -> Double32 {
        Double32 { params: None }
    }

    /// Parse a `Double32_t` member title. Titles that are not of the
    /// bracketed three-part form mean "no packing" (`None`); titles of the
    /// right form with unparsable numbers fall back to `(0.0, 0.0, 32)`
    /// rather than erroring, which is long-standing reader behavior.
    pub fn from_title(title: &str) -> Double32 {
        let title = title.trim();
        let Some(body) = title
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
        else {
            return Double32 { params: None };
        };
        let parts: Vec<&str> = body.split(',').collect();
        if parts.len() != 3 {
            return Double32 { params: None };
        }
        let parsed = (
            parts[0].trim().parse::<f64>(),
            parts[1].trim().parse::<f64>(),
            parts[2].trim().parse::<u32>(),
        );
        match parsed {
            (Ok(xmin), Ok(xmax), Ok(nbits)) if nbits >= 1 && nbits <= 64 => Double32 {
                params: Some((xmin, xmax, nbits)),
            },
            _ => Double32 {
                params: Some((0.0, 0.0, 32)),
            },
        }
    }

    pub fn read(&self, buffer: &mut ReadBuffer) -> Result<Value> {
        let Some((xmin, xmax, nbits)) = self.params else {
            return Ok(Value::F64(buffer.f32_be()?.into()));
        };
        let nbytes = nbits.div_ceil(8) as usize;
        let raw = buffer
            .consume(nbytes)?
            .into_iter()
            .fold(0u64, |acc, b| (acc << 8) | u64::from(b));
        let value = if xmax > xmin {
            let steps = ((1u128 << nbits) - 1) as f64;
            xmin + raw as f64 * (xmax - xmin) / steps
        } else {
            // Degenerate range (including the malformed-title fallback):
            // identity scaling.
            xmin + raw as f64
        };
        Ok(Value::F64(value))
    }
}
