/// Zero-pad `n` to the full u64 width, grouping digits with '_' so that
/// file names sort lexically in numeric order, e.g.
/// `00_000_000_000_000_001_024`.
pub(crate) fn format_pad_u64(n: u64) -> String {
    group_digits(format!("{:020}", n))
}

/// Pad to at least 9 digits, grouped. Used for human-facing stat output.
pub(crate) fn format_pad9_u64(n: u64) -> String {
    group_digits(format!("{:09}", n))
}

fn group_digits(digits: String) -> String {
    let len = digits.len();
    let mut out = String::with_capacity(len + len / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            out.push('_');
        }
        out.push(c);
    }
    out
}
