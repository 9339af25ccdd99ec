/// Join key shared by stall numbers and map space identifiers.
///
/// Lowercases first, then keeps alphanumeric characters only, so case, whitespace,
/// separators and any combining marks produced by lowercasing all disappear.
/// Never fails: `None` and blank input produce an empty key.
pub fn normalize_key(raw: Option<&str>) -> String {
    let Some(raw) = raw else {
        return String::new();
    };
    raw.chars()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_alphanumeric())
        .collect()
}

/// First candidate that is present and not blank.
pub fn first_present<'a, const N: usize>(candidates: [Option<&'a str>; N]) -> Option<&'a str> {
    candidates
        .into_iter()
        .flatten()
        .find(|value| !value.trim().is_empty())
}
