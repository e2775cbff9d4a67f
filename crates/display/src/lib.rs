//! Text side of the dashboard: number formatting and the readout projection.

mod readouts;

pub use readouts::{project, Field, ReadoutPump, ReadoutSink, Readouts};

/// Shown in place of a number that cannot be rendered.
pub const PLACEHOLDER: &str = "--";

/// Precision is capped here; beyond it `f64` carries no information anyway.
pub const MAX_PRECISION: u32 = 20;

/// Round `val` to `precision` decimal places and render it with exactly that
/// many digits after the point.
///
/// Rounding is done on the shortest decimal representation of `val`, so
/// `format(12.345, 2)` is `"12.35"` even though the binary value sits just
/// below the midpoint. Ties go toward +∞ as `Math.round` does: `-2.5` at
/// precision 0 is `"-2"`. A result that rounds to zero never carries a
/// minus sign.
pub fn format(val: f64, precision: u32) -> String {
    if !val.is_finite() {
        return PLACEHOLDER.to_owned();
    }
    let p = precision.min(MAX_PRECISION) as usize;
    // f64's Display never uses exponent notation
    let repr = val.abs().to_string();
    let (int, frac) = repr.split_once('.').unwrap_or((repr.as_str(), ""));

    let mut digits: Vec<u8> = int
        .bytes()
        .chain(frac.bytes().chain(std::iter::repeat(b'0')).take(p))
        .map(|b| b - b'0')
        .collect();

    let tail = frac.as_bytes().get(p..).unwrap_or(&[]);
    let round_up = match tail.first() {
        Some(&d) if d > b'5' => true,
        // exact tie only when nothing nonzero follows the 5
        Some(b'5') => val > 0.0 || tail[1..].iter().any(|&d| d != b'0'),
        _ => false,
    };
    if round_up {
        let mut i = digits.len();
        loop {
            if i == 0 {
                digits.insert(0, 1);
                break;
            }
            i -= 1;
            if digits[i] == 9 {
                digits[i] = 0;
            } else {
                digits[i] += 1;
                break;
            }
        }
    }

    let int_len = digits.len() - p;
    let mut out = String::with_capacity(digits.len() + 2);
    if val < 0.0 && digits.iter().any(|&d| d != 0) {
        out.push('-');
    }
    out.extend(digits[..int_len].iter().map(|&d| char::from(b'0' + d)));
    if p > 0 {
        out.push('.');
        out.extend(digits[int_len..].iter().map(|&d| char::from(b'0' + d)));
    }
    out
}
