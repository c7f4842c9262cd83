//! Query string encoding and decoding.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Characters left untouched when encoding query keys and values.
const QUERY_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Split a request target into its path and optional query string.
pub fn split_target(target: &str) -> (&str, Option<&str>) {
    match target.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (target, None),
    }
}

/// Decode one query component. `+` is a space; malformed percent
/// sequences are kept literally.
pub fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

/// Encode one query component.
pub fn encode_component(raw: &str) -> String {
    utf8_percent_encode(raw, QUERY_COMPONENT)
        .to_string()
        .replace("%20", "+")
}

/// Parse a query string into key/value pairs. Duplicate keys are kept.
pub fn parse_query(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (decode_component(k), decode_component(v)),
            None => (decode_component(pair), String::new()),
        })
        .collect()
}

/// Serialize key/value pairs into a query string (without the leading `?`).
pub fn encode_query<'a, I>(params: I) -> String
where
    I: IntoIterator<Item = &'a (String, String)>,
{
    params
        .into_iter()
        .map(|(k, v)| format!("{}={}", encode_component(k), encode_component(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Append encoded parameters to a target, respecting an existing query.
pub fn append_query(target: &str, params: &[(String, String)]) -> String {
    if params.is_empty() {
        return target.to_string();
    }
    let sep = if target.contains('?') { '&' } else { '?' };
    format!("{}{}{}", target, sep, encode_query(params))
}
