use std::io::{self, Write};

use crate::measurement::Measurement;

pub fn render(measurement: &Measurement) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(measurement)
}

/// Writes one rendered measurement to `out`. A measurement that fails to
/// serialize is logged and skipped; only write errors are returned.
pub fn present<W: Write>(out: &mut W, measurement: &Measurement) -> io::Result<()> {
    let rendered = match render(measurement) {
        Ok(rendered) => rendered,
        Err(e) => {
            log::error!("Failed to serialize measurement {measurement:?}: {e}");
            return Ok(());
        }
    };

    writeln!(out, "{rendered}")?;
    out.flush()
}
