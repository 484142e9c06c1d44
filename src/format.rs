use chrono::{DateTime, FixedOffset, Utc};

// Flow-meter unit codes 0-22 as published by the PLC bridge.
const UNIT_LABELS: [&str; 23] = [
    "m3",
    "LPM",
    "LPS",
    "USGPM",
    "IGPM",
    "USGPH",
    "IGPH",
    "LPH",
    "TPH",
    "KGPH",
    "X10 LPM",
    "X10 USGPM",
    "X10 IGPM",
    "X10 USGPH",
    "X100 USGPH",
    "X10 IGPH",
    "X100 IGPH",
    "X10 LPH",
    "X100 LPH",
    "X1000 LPH",
    "X10 KGPH",
    "X100 KGPH",
    "X1000 KGPH",
];

/// Look up the display label for a unit code. Codes outside the table are
/// rendered as "Unknown", never an error.
pub fn unit_label(code: i64) -> &'static str {
    usize::try_from(code)
        .ok()
        .and_then(|idx| UNIT_LABELS.get(idx).copied())
        .unwrap_or("Unknown")
}

/// Render a raw integer register value with an externally supplied
/// decimal-place count.
///
/// This is fixed-point digit insertion, not floating rounding: the last
/// `decimal_places` digits of the value's decimal text fall after the
/// point, left-padding with zeros when the text is shorter than that.
/// `format_quantity(5, 2)` is `"0.05"`, `format_quantity(12345, 2)` is
/// `"123.45"`.
pub fn format_quantity(value: i64, decimal_places: u32) -> String {
    let sign = if value < 0 { "-" } else { "" };
    let mut digits = value.unsigned_abs().to_string();

    if decimal_places == 0 {
        return format!("{sign}{digits}");
    }

    let dp = decimal_places as usize;
    if digits.len() < dp + 1 {
        digits = format!("{:0>width$}", digits, width = dp + 1);
    }
    let point = digits.len() - dp;
    format!("{sign}{}.{}", &digits[..point], &digits[point..])
}

/// Render a windowed average with the representative decimal-place count.
/// Unlike [`format_quantity`] the input here is already in display units.
pub fn format_scaled(value: f64, decimal_places: u32) -> String {
    format!("{value:.prec$}", prec = decimal_places as usize)
}

/// Render a timestamp in the deployment's fixed display offset, en-IN
/// style with a 12-hour clock, e.g. `30/08/2026, 05:30:00 pm`.
pub fn render_timestamp(ts: DateTime<Utc>, offset: FixedOffset) -> String {
    ts.with_timezone(&offset)
        .format("%d/%m/%Y, %I:%M:%S %P")
        .to_string()
}
