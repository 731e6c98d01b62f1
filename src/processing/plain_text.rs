//! `"Name: message"` parsing for producers that publish bare text

use crate::protocol::PLAIN_TEXT_SENDER;

const DELIMITER: &str = ": ";

/// The delimiter must sit strictly inside the first this-many characters.
pub const SENDER_PREFIX_WINDOW: usize = 30;

/// Split a plain-text line into `(sender, content)`.
///
/// A `": "` whose character index `i` satisfies `0 < i < 30` separates the
/// sender from the message; anything else is attributed to the `"Remoto"` sentinel
/// with the text unchanged, so a colon deep inside a sentence is not mistaken
/// for a name.
///
/// # Examples
/// ```
/// use relaychat::processing::split_plain_text;
///
/// assert_eq!(
///     split_plain_text("Alice: hello there"),
///     ("Alice".to_string(), "hello there".to_string())
/// );
/// assert_eq!(
///     split_plain_text("no delimiter here"),
///     ("Remoto".to_string(), "no delimiter here".to_string())
/// );
/// ```
pub fn split_plain_text(text: &str) -> (String, String) {
    if let Some(byte_index) = text.find(DELIMITER) {
        let char_index = text[..byte_index].chars().count();

        if char_index > 0 && char_index < SENDER_PREFIX_WINDOW {
            let content = &text[byte_index + DELIMITER.len()..];
            return (text[..byte_index].to_string(), content.to_string());
        }
    }

    (PLAIN_TEXT_SENDER.to_string(), text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_name_prefix() {
        assert_eq!(
            split_plain_text("Alice: hello there"),
            ("Alice".to_string(), "hello there".to_string())
        );
    }

    #[test]
    fn test_only_first_delimiter_splits() {
        assert_eq!(
            split_plain_text("Bob: note: bring snacks"),
            ("Bob".to_string(), "note: bring snacks".to_string())
        );
    }

    #[test]
    fn test_delimiter_past_window() {
        let late = "a sentence that runs long enough: before its colon";
        assert_eq!(
            split_plain_text(late),
            ("Remoto".to_string(), late.to_string())
        );
    }

    #[test]
    fn test_delimiter_at_boundary() {
        let at_29 = format!("{}: x", "n".repeat(29));
        assert_eq!(split_plain_text(&at_29).0, "n".repeat(29));

        let at_30 = format!("{}: x", "n".repeat(30));
        assert_eq!(split_plain_text(&at_30), ("Remoto".to_string(), at_30.clone()));
    }

    #[test]
    fn test_leading_delimiter_is_not_a_name() {
        assert_eq!(
            split_plain_text(": orphan"),
            ("Remoto".to_string(), ": orphan".to_string())
        );
    }

    #[test]
    fn test_split_keeps_surrounding_whitespace() {
        assert_eq!(
            split_plain_text("   : blank name"),
            ("   ".to_string(), "blank name".to_string())
        );
        assert_eq!(
            split_plain_text(" Bob:  hi "),
            (" Bob".to_string(), " hi ".to_string())
        );
    }

    #[test]
    fn test_window_counts_characters_not_bytes() {
        // 20 two-byte characters: 40 bytes but index 20
        let name = "é".repeat(20);
        let text = format!("{name}: hola");
        assert_eq!(split_plain_text(&text), (name, "hola".to_string()));
    }

    #[test]
    fn test_colon_without_space() {
        assert_eq!(
            split_plain_text("time 10:30"),
            ("Remoto".to_string(), "time 10:30".to_string())
        );
    }

    proptest! {
        #[test]
        fn text_without_delimiter_is_remote(text in "[^:]{0,60}") {
            prop_assert_eq!(split_plain_text(&text), ("Remoto".to_string(), text.clone()));
        }

        #[test]
        fn short_names_are_recovered(name in "[A-Za-z][A-Za-z0-9]{0,20}", body in "[a-z ]{0,40}") {
            let (sender, content) = split_plain_text(&format!("{name}: {body}"));
            prop_assert_eq!(sender, name);
            prop_assert_eq!(content, body);
        }
    }
}
