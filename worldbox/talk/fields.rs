use indexmap::IndexMap;
use parking_lot::Mutex;

/// Registry of named text fields that can receive recognized speech.
///
/// Fields stand in for the input widgets of a UI layer: subsystems register
/// the fields they own, the talk router writes recognition results into
/// them, and producers read them back when triggered.
#[derive(Debug, Default)]
pub struct FieldBank {
    fields: Mutex<IndexMap<String, String>>,
}

impl FieldBank {
    /// Creates an empty bank.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a field, leaving existing content untouched.
    pub fn register(&self, name: impl Into<String>) {
        self.fields.lock().entry(name.into()).or_default();
    }

    /// Whether the field exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.fields.lock().contains_key(name)
    }

    /// Current content of a field, `None` when unregistered.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<String> {
        self.fields.lock().get(name).cloned()
    }

    /// Replaces a field's content, registering it on first write.
    pub fn set(&self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.lock().insert(name.into(), value.into());
    }

    /// Appends to a field after a separating space (no space when empty).
    pub fn append(&self, name: impl Into<String>, value: &str) {
        let mut fields = self.fields.lock();
        let entry = fields.entry(name.into()).or_default();
        if entry.is_empty() {
            entry.push_str(value);
        } else {
            entry.push(' ');
            entry.push_str(value);
        }
    }

    /// Clears a field's content.
    pub fn clear(&self, name: &str) {
        if let Some(entry) = self.fields.lock().get_mut(name) {
            entry.clear();
        }
    }

    /// Registered field names, in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.fields.lock().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_separates_with_single_space() {
        let bank = FieldBank::new();
        bank.append("prompt", "hello");
        bank.append("prompt", "world");
        assert_eq!(bank.get("prompt").unwrap(), "hello world");
    }

    #[test]
    fn set_replaces_content() {
        let bank = FieldBank::new();
        bank.set("prompt", "first");
        bank.set("prompt", "second");
        assert_eq!(bank.get("prompt").unwrap(), "second");
    }

    #[test]
    fn register_preserves_existing_content() {
        let bank = FieldBank::new();
        bank.set("prompt", "kept");
        bank.register("prompt");
        assert_eq!(bank.get("prompt").unwrap(), "kept");
    }
}
