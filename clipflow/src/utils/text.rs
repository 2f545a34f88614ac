//! Text normalization helpers.

/// Turns free text into a hashtag: words are capitalized and joined, and
/// anything that is not alphanumeric is dropped.
///
/// Returns `None` when nothing usable remains.
#[must_use]
pub fn hashtag(text: &str) -> Option<String> {
    let body: String = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_uppercase().chain(chars).collect()
            })
        })
        .collect();

    if body.is_empty() {
        None
    } else {
        Some(format!("#{body}"))
    }
}

/// Lowercases `text` and joins its alphanumeric words with `-`.
#[must_use]
pub fn slugify(text: &str) -> String {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hashtag() {
        assert_eq!(hashtag("quantum computing").as_deref(), Some("#QuantumComputing"));
        assert_eq!(hashtag("AI & robots!").as_deref(), Some("#AIRobots"));
        assert_eq!(hashtag("  ?! ").as_deref(), None);
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Quantum Computing: 101"), "quantum-computing-101");
        assert_eq!(slugify("cats"), "cats");
        assert_eq!(slugify("--"), "");
    }
}
