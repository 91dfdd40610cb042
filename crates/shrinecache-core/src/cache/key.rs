use url::form_urlencoded;

/// Build the cache key for a request.
///
/// The path is trimmed of surrounding slashes, parameters with empty values
/// are dropped, and the rest are sorted by name then value, so the same
/// logical request always maps to the same key. Names and values are
/// form-encoded, so the key is also a valid request path.
pub fn fingerprint(path: &str, params: &[(&str, &str)]) -> String {
    let path = path.trim_matches('/');

    let mut pairs: Vec<(&str, &str)> = params
        .iter()
        .copied()
        .filter(|(_, value)| !value.is_empty())
        .collect();
    if pairs.is_empty() {
        return path.to_string();
    }
    pairs.sort_unstable();

    let query = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish();
    format!("{}?{}", path, query)
}
