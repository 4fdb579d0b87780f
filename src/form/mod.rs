pub mod compression;
pub mod patterns;
pub mod sheet;

pub use compression::{BarMapEntry, CompressedSection};
pub use patterns::FormPattern;
pub use sheet::FormSheet;

/// Section letter for a zero-based index: A..Z, then AA, AB, ...
pub fn section_label(index: usize) -> String {
    let mut n = index;
    let mut label = Vec::new();
    loop {
        label.push(b'A' + (n % 26) as u8);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    label.reverse();
    String::from_utf8_lossy(&label).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_labels() {
        assert_eq!(section_label(0), "A");
        assert_eq!(section_label(25), "Z");
        assert_eq!(section_label(26), "AA");
        assert_eq!(section_label(27), "AB");
        assert_eq!(section_label(52), "BA");
    }
}
