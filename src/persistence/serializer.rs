//! Entry Serialization
//!
//! The persistent backend never picks a wire format itself; the host injects
//! a [`Serializer`]. Values declare a post-load hook through [`Persistable`].

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::error::StoreResult;

/// Turns values into bytes and back
pub trait Serializer: Send + Sync + 'static {
    fn serialize<T: Serialize>(&self, value: &T) -> StoreResult<Vec<u8>>;

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> StoreResult<T>;
}

/// Compact binary encoding (default)
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeSerializer;

impl Serializer for BincodeSerializer {
    fn serialize<T: Serialize>(&self, value: &T) -> StoreResult<Vec<u8>> {
        Ok(bincode::serialize(value)?)
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> StoreResult<T> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Human-readable JSON encoding, inspectable with `stowage-admin`
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize<T: Serialize>(&self, value: &T) -> StoreResult<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> StoreResult<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Typed bag of transient collaborators supplied by the host.
///
/// Values that hold references a serializer cannot carry (handles, shared
/// registries) look them up here in [`Persistable::after_load`].
#[derive(Default, Clone)]
pub struct Extensions {
    map: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a collaborator, replacing any previous one of the same type.
    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) {
        self.map.insert(TypeId::of::<T>(), Arc::new(value));
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|v| v.downcast_ref::<T>())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions")
            .field("len", &self.map.len())
            .finish()
    }
}

/// What a freshly deserialized value can see while it is fixed up.
#[derive(Debug, Clone, Copy)]
pub struct LoadContext<'a> {
    pub partition: &'a str,
    pub extensions: &'a Extensions,
}

/// A value the persistent backend can store.
///
/// `after_load` runs exactly once each time the backend materializes a value
/// from disk, before the value reaches the caller.
pub trait Persistable: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn after_load(&mut self, _ctx: &LoadContext<'_>) {}
}

macro_rules! persistable_as_is {
    ($($ty:ty),* $(,)?) => {
        $(impl Persistable for $ty {})*
    };
}

persistable_as_is!(
    bool,
    char,
    u8,
    u16,
    u32,
    u64,
    i8,
    i16,
    i32,
    i64,
    f32,
    f64,
    String,
    serde_json::Value,
);

impl<T: Persistable> Persistable for Vec<T> {
    fn after_load(&mut self, ctx: &LoadContext<'_>) {
        for item in self.iter_mut() {
            item.after_load(ctx);
        }
    }
}

impl<T: Persistable> Persistable for Option<T> {
    fn after_load(&mut self, ctx: &LoadContext<'_>) {
        if let Some(inner) = self {
            inner.after_load(ctx);
        }
    }
}

impl<T: Persistable> Persistable for BTreeMap<String, T> {
    fn after_load(&mut self, ctx: &LoadContext<'_>) {
        for value in self.values_mut() {
            value.after_load(ctx);
        }
    }
}
