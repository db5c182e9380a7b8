use std::collections::HashMap;

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .unwrap_or(spaced)
}

/// Parse `key=value&key2=value2` pairs, URL-decoding both sides.
///
/// Multiple values for the same key are not supported (only the last is kept).
/// A key without `=` is kept as a flag with an empty value.
pub fn parse_pairs(input: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();

    for param in input.split('&').filter(|p| !p.is_empty()) {
        match param.split_once('=') {
            Some((key, value)) => {
                params.insert(decode_component(key), decode_component(value));
            }
            None => {
                params.insert(decode_component(param), String::new());
            }
        }
    }

    params
}

/// Parse query parameters from a URI string
///
/// # Example
/// ```
/// use quill::core::query_params::parse_query_params;
///
/// let params = parse_query_params("/profile/john/?page=2&anchor=abc");
/// assert_eq!(params.get("page"), Some(&"2".to_string()));
/// assert_eq!(params.get("anchor"), Some(&"abc".to_string()));
/// ```
pub fn parse_query_params(uri: &str) -> HashMap<String, String> {
    match uri.split_once('?') {
        Some((_, query)) => parse_pairs(query),
        None => HashMap::new(),
    }
}

/// Parse an `application/x-www-form-urlencoded` request body.
pub fn parse_form(body: &[u8]) -> HashMap<String, String> {
    parse_pairs(&String::from_utf8_lossy(body))
}

/// Get a string parameter, treating an empty value as absent.
pub fn get_string(params: &HashMap<String, String>, key: &str) -> Option<String> {
    params
        .get(key)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_form_bodies() {
        let form = parse_form(b"text=Hello+world%21&group=&image=posts%2Fsmall.gif");
        assert_eq!(form.get("text").map(String::as_str), Some("Hello world!"));
        assert_eq!(get_string(&form, "group"), None);
        assert_eq!(get_string(&form, "image").as_deref(), Some("posts/small.gif"));
    }

    #[test]
    fn query_without_question_mark_is_empty() {
        assert!(parse_query_params("/group/cats/").is_empty());
        let params = parse_query_params("/?page=3&flag");
        assert_eq!(params.get("page").map(String::as_str), Some("3"));
        assert_eq!(params.get("flag").map(String::as_str), Some(""));
    }
}
