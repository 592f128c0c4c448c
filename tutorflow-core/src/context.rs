//! Shared context threaded through every node of a run.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::Arc,
};

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::error::{FlowError, Result};

/// Mutable key/value store shared by all nodes of one flow run.
///
/// Values are kept as JSON so nodes can agree on key names without sharing
/// Rust types. Values that cannot be serialized (clients, handles) go into
/// the typed extension slot instead, one per type.
///
/// The flow borrows the context; it is never copied between nodes.
#[derive(Debug, Default)]
pub struct Context {
    values: HashMap<String, Value>,
    extensions: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    metadata: HashMap<String, Value>,
}

impl Context {
    /// Create a new empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context from initial JSON values.
    pub fn from_json(values: HashMap<String, Value>) -> Self {
        Self {
            values,
            ..Self::default()
        }
    }

    /// Store a value under `key`, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Serialize) -> Result<()> {
        let json_value = serde_json::to_value(value)?;
        self.values.insert(key.into(), json_value);
        Ok(())
    }

    /// Read and deserialize the value under `key`.
    ///
    /// Returns `Ok(None)` when the key is absent and an error when the stored
    /// value does not deserialize into `T`.
    pub fn get<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        self.values
            .get(key)
            .map(|value| serde_json::from_value(value.clone()))
            .transpose()
            .map_err(FlowError::from)
    }

    /// Like [`Context::get`] but a missing key is a context error.
    pub fn require<T>(&self, key: &str) -> Result<T>
    where
        T: DeserializeOwned,
    {
        self.get(key)?
            .ok_or_else(|| FlowError::context(format!("missing context key '{key}'")))
    }

    /// Get raw JSON value by key.
    pub fn get_raw(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Remove a value by key.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// Check if a value exists under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// All value keys.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    /// Store a typed, non-serializable value. One slot per type.
    pub fn insert_ext<T>(&mut self, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.extensions.insert(TypeId::of::<T>(), Arc::new(value));
    }

    /// Borrow a typed extension value.
    pub fn ext<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.extensions
            .get(&TypeId::of::<T>())
            .and_then(|data| data.downcast_ref::<T>())
    }

    /// Remove a typed extension value.
    ///
    /// Returns `None` if the value is absent or still shared elsewhere.
    pub fn remove_ext<T>(&mut self) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        let data = self.extensions.remove(&TypeId::of::<T>())?;
        data.downcast::<T>()
            .ok()
            .and_then(|arc| Arc::try_unwrap(arc).ok())
    }

    /// Set metadata.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Serialize) -> Result<()> {
        let json_value = serde_json::to_value(value)?;
        self.metadata.insert(key.into(), json_value);
        Ok(())
    }

    /// Get metadata.
    pub fn get_metadata<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        self.metadata
            .get(key)
            .map(|value| serde_json::from_value(value.clone()))
            .transpose()
            .map_err(FlowError::from)
    }

    /// Merge the values and metadata of another context into this one.
    ///
    /// Entries from `other` override existing ones with the same key.
    /// Extensions are not merged.
    pub fn merge(&mut self, other: &Context) {
        for (key, value) in &other.values {
            self.values.insert(key.clone(), value.clone());
        }
        for (key, value) in &other.metadata {
            self.metadata.insert(key.clone(), value.clone());
        }
    }

    /// Number of values, extensions included.
    pub fn len(&self) -> usize {
        self.values.len() + self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.extensions.is_empty()
    }

    /// JSON snapshot of the values (extensions and metadata excluded).
    pub fn to_json(&self) -> Result<Value> {
        serde_json::to_value(&self.values).map_err(FlowError::from)
    }

    pub fn values(&self) -> &HashMap<String, Value> {
        &self.values
    }

    pub fn metadata(&self) -> &HashMap<String, Value> {
        &self.metadata
    }
}

/// Builder for creating contexts with initial data.
#[derive(Default)]
pub struct ContextBuilder {
    context: Context,
}

impl ContextBuilder {
    /// Create a new context builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an initial value.
    pub fn with(mut self, key: impl Into<String>, value: impl Serialize) -> Result<Self> {
        self.context.set(key, value)?;
        Ok(self)
    }

    /// Insert a typed extension.
    pub fn with_ext<T>(mut self, value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        self.context.insert_ext(value);
        self
    }

    /// Set metadata.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Serialize) -> Result<Self> {
        self.context.set_metadata(key, value)?;
        Ok(self)
    }

    /// Build the context.
    pub fn build(self) -> Context {
        self.context
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Chapter {
        index: usize,
        title: String,
    }

    #[test]
    fn values_are_stored_as_json() {
        let mut context = Context::new();
        let chapter = Chapter {
            index: 1,
            title: "Flows".to_string(),
        };

        context.set("chapter", &chapter).unwrap();
        context.set("count", 3).unwrap();
        context.set("tags", vec!["a", "b"]).unwrap();

        assert_eq!(context.get::<Chapter>("chapter").unwrap(), Some(chapter));
        assert_eq!(context.get::<i64>("count").unwrap(), Some(3));
        assert_eq!(
            context.get::<Vec<String>>("tags").unwrap(),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert!(context.get::<i64>("missing").unwrap().is_none());
        assert!(context.contains("count"));

        assert!(context.remove("count").is_some());
        assert!(!context.contains("count"));
    }

    #[test]
    fn wrong_type_is_an_error_not_a_miss() {
        let mut context = Context::new();
        context.set("count", "three").unwrap();

        assert!(context.get::<i64>("count").is_err());
    }

    #[test]
    fn require_reports_missing_key() {
        let context = Context::new();
        let err = context.require::<String>("repo").unwrap_err();

        assert!(err.to_string().contains("repo"));
    }

    #[test]
    fn extensions_hold_non_json_values() {
        #[derive(Debug, PartialEq)]
        struct Handle(u32);

        let mut context = Context::new();
        context.insert_ext(Handle(7));

        assert_eq!(context.ext::<Handle>(), Some(&Handle(7)));
        assert_eq!(context.ext::<String>(), None);
        assert_eq!(context.remove_ext::<Handle>(), Some(Handle(7)));
        assert!(context.ext::<Handle>().is_none());
    }

    #[test]
    fn builder_sets_values_and_metadata() {
        let context = ContextBuilder::new()
            .with("language", "english")
            .unwrap()
            .with_ext(42u8)
            .with_metadata("version", "1.0")
            .unwrap()
            .build();

        assert_eq!(
            context.get::<String>("language").unwrap(),
            Some("english".to_string())
        );
        assert_eq!(context.ext::<u8>(), Some(&42));
        assert_eq!(
            context.get_metadata::<String>("version").unwrap(),
            Some("1.0".to_string())
        );
        assert_eq!(context.len(), 2);
    }

    #[test]
    fn merge_overrides_values() {
        let mut first = Context::new();
        first.set("key1", "value1").unwrap();

        let mut second = Context::new();
        second.set("key1", "newvalue1").unwrap();
        second.set("key2", "value2").unwrap();
        second.set_metadata("meta", 1).unwrap();

        first.merge(&second);

        assert_eq!(
            first.get::<String>("key1").unwrap(),
            Some("newvalue1".to_string())
        );
        assert_eq!(
            first.get::<String>("key2").unwrap(),
            Some("value2".to_string())
        );
        assert_eq!(first.get_metadata::<i32>("meta").unwrap(), Some(1));
    }
}
