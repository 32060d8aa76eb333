use serde::Deserialize;

/// One line of a simulated dialogue.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Utterance {
    /// Abstract speaker role (`expert` or `novice`).
    pub speaker: String,
    /// What the speaker says.
    pub utterance: String,
}

/// Incremental extractor of complete utterance objects from a streamed
/// JSON response.
///
/// The dialogue arrives as one JSON document token by token; waiting for
/// the full body before speaking would defeat the streaming. The scanner
/// tracks brace depth and string state across pushes and tries to decode
/// every balanced object as an [`Utterance`], ignoring anything else
/// (including the enclosing response object).
#[derive(Debug, Default)]
pub struct UtteranceScanner {
    buffer: String,
    pos: usize,
    starts: Vec<usize>,
    in_string: bool,
    escaped: bool,
}

impl UtteranceScanner {
    /// Creates an empty scanner.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one streamed chunk; returns utterances completed by it.
    pub fn push(&mut self, chunk: &str) -> Vec<Utterance> {
        self.buffer.push_str(chunk);
        let mut complete = Vec::new();
        let bytes = self.buffer.as_bytes();
        for index in self.pos..bytes.len() {
            let byte = bytes[index];
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                }
                continue;
            }
            match byte {
                b'"' => self.in_string = true,
                b'{' => self.starts.push(index),
                b'}' => {
                    if let Some(start) = self.starts.pop() {
                        let candidate = &self.buffer[start..=index];
                        if let Ok(utterance) = serde_json::from_str::<Utterance>(candidate) {
                            complete.push(utterance);
                        }
                    }
                }
                _ => {}
            }
        }
        self.pos = bytes.len();
        complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_objects_split_across_chunks() {
        let mut scanner = UtteranceScanner::new();
        assert!(scanner
            .push(r#"{"utterances": [{"speaker": "expert", "utter"#)
            .is_empty());
        let first = scanner.push(r#"ance": "The lighthouse is solar powered."}, {"spea"#);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].speaker, "expert");
        let second = scanner.push(r#"ker": "novice", "utterance": "Since when?"}]}"#);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].utterance, "Since when?");
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_the_scanner() {
        let mut scanner = UtteranceScanner::new();
        let found = scanner.push(
            r#"{"utterances": [{"speaker": "expert", "utterance": "Braces {like these} and a quote \" survive."}]}"#,
        );
        assert_eq!(found.len(), 1);
        assert!(found[0].utterance.contains("{like these}"));
    }

    #[test]
    fn enclosing_object_is_not_an_utterance() {
        let mut scanner = UtteranceScanner::new();
        let found =
            scanner.push(r#"{"utterances": [{"speaker": "novice", "utterance": "hi"}]}"#);
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn unrelated_objects_are_skipped() {
        let mut scanner = UtteranceScanner::new();
        let found = scanner.push(r#"{"meta": {"model": "x"}, "utterances": []}"#);
        assert!(found.is_empty());
    }
}
