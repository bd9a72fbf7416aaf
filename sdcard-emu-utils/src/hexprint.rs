use std::fmt::Write;

const BYTES_PER_LINE: usize = 16;

// 10-character address, 2 spaces, 16 bytes at 3 characters each with 3
// extra group spaces, 2 spaces, 18 characters of ASCII column, 1 newline.
const LINE_WIDTH: usize = 10 + 2 + 16 * 3 + 3 + 2 + 18 + 1;

/// Format `buf` as a hex block, sixteen bytes per line with an ASCII column.
/// The listed addresses start from `start`.
pub fn hex_dump(buf: &[u8], start: usize) -> String {
    let mut out = String::with_capacity((buf.len() / BYTES_PER_LINE + 1) * LINE_WIDTH);
    for (row, chunk) in buf.chunks(BYTES_PER_LINE).enumerate() {
        if row != 0 {
            out.push('\n');
        }
        write!(out, "{:#010X}", start + row * BYTES_PER_LINE).unwrap();
        for col in 0..BYTES_PER_LINE {
            // Double space before each group of four, single otherwise.
            if col % 4 == 0 {
                out.push_str("  ");
            } else {
                out.push(' ');
            }
            match chunk.get(col) {
                Some(byte) => write!(out, "{:02X}", byte).unwrap(),
                None => out.push_str("  "),
            }
        }
        out.push_str("  |");
        out.extend(chunk.iter().map(|&b| printable(b)));
        out.push('|');
    }
    out
}

fn printable(chr: u8) -> char {
    match chr {
        32..=126 => chr.into(),
        _ => '.',
    }
}
