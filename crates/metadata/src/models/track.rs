/// Extracts the track number from `"3"`, `"03"` or `"3/12"` (numerator).
///
/// Anything non-numeric counts as no track number, as do zero and anything
/// above [`MAX_TRACK_NUMBER`].
pub fn track_number(raw: &str) -> Option<u32> {
    let numerator = raw.split('/').next()?.trim();
    numerator.parse::<u32>().ok().filter(|n| (1..=MAX_TRACK_NUMBER).contains(n))
}

/// Highest track number taken at face value. Larger values come from broken
/// taggers, not from real releases.
pub const MAX_TRACK_NUMBER: u32 = 999;

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("3", Some(3))]
    #[case("03", Some(3))]
    #[case("3/12", Some(3))]
    #[case(" 07 / 10 ", Some(7))]
    #[case("999/999", Some(999))]
    #[case("0", None)]
    #[case("1000", None)]
    #[case("4294967295", None)]
    #[case("99999999999", None)]
    #[case("A1", None)]
    #[case("", None)]
    #[case("/12", None)]
    fn test_track_number(#[case] raw: &str, #[case] expected: Option<u32>) {
        assert_eq!(track_number(raw), expected);
    }
}
