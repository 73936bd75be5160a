const MIN_TOKEN_CHARS: usize = 2;

/// Normalizes raw query text into `(clean_query, tokens)`.
///
/// An empty `clean_query` means the request is a plain listing, not a search.
pub fn preprocess_query(raw: &str) -> (String, Vec<String>) {
    let mut normalized = String::with_capacity(raw.len() + 8);
    let mut previous: Option<char> = None;

    for ch in raw.chars() {
        if ch.is_uppercase() && previous.is_some_and(char::is_lowercase) {
            normalized.push(' ');
        }
        previous = Some(ch);

        if ch.is_alphanumeric() || ch.is_whitespace() || ch == '\'' {
            normalized.extend(ch.to_lowercase());
        } else {
            normalized.push(' ');
        }
    }

    let tokens = normalized
        .split_whitespace()
        .filter(|token| token.chars().count() >= MIN_TOKEN_CHARS)
        .map(str::to_string)
        .collect::<Vec<_>>();

    (tokens.join(" "), tokens)
}

#[cfg(test)]
mod tests {
    use super::preprocess_query;

    #[test]
    fn splits_camel_case_and_separators() {
        let (clean, tokens) = preprocess_query("myDocument_Name.pdf");
        assert_eq!(tokens, vec!["my", "document", "name", "pdf"]);
        assert_eq!(clean, "my document name pdf");
    }

    #[test]
    fn drops_single_characters_and_punctuation() {
        let (clean, tokens) = preprocess_query("  a (Budget) -- 2024!! x ");
        assert_eq!(tokens, vec!["budget", "2024"]);
        assert_eq!(clean, "budget 2024");
    }

    #[test]
    fn keeps_apostrophes() {
        let (clean, _) = preprocess_query("Don't PANIC");
        assert_eq!(clean, "don't panic");
    }

    #[test]
    fn empty_and_noise_only_input_yields_empty_query() {
        assert_eq!(preprocess_query(""), (String::new(), Vec::new()));
        assert_eq!(preprocess_query(" - _ . ! ? "), (String::new(), Vec::new()));
    }
}
