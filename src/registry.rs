//! # Type Registry
//!
//! Process-wide table mapping numeric type ids to named payload types and their
//! (de)serializers. Ids are assigned in contiguous blocks, usually through
//! [`type_id_block!`](crate::type_id_block), before any actor is spawned.
//!
//! A slot is write-once: registering the same `(id, name)` again is a no-op,
//! registering a different name under a bound id is a programming error and
//! aborts the process through [`register`]. Use [`try_register`] to observe the
//! conflict instead.
//!
//! Reads go through an atomically swapped snapshot and take no lock, so the
//! per-send id lookup in [`Message::new`] stays cheap once registration is done.
//!
//! Serialization uses `bincode`; the byte layout is whatever bincode produces
//! for the payload's serde representation.

use crate::error::RegistryError;
use crate::framework::{Message, Payload};
use arc_swap::ArcSwap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::{type_name, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error};

type SerializeFn = fn(&Message) -> Result<Vec<u8>, RegistryError>;
type DeserializeFn = fn(&[u8]) -> Result<Message, RegistryError>;

/// Name, Rust type and codec of one registered payload type.
#[derive(Clone)]
pub struct TypeDescriptor {
    pub type_id: u32,
    pub name: String,
    pub rust_type: TypeId,
    serialize: SerializeFn,
    deserialize: DeserializeFn,
}

fn encode<T: Payload + Serialize>(msg: &Message) -> Result<Vec<u8>, RegistryError> {
    let value = msg
        .downcast_ref::<T>()
        .ok_or_else(|| RegistryError::TypeMismatch {
            expected: type_name::<T>().to_string(),
            got: msg.type_name(),
        })?;
    bincode::serialize(value).map_err(|e| RegistryError::Codec(e.to_string()))
}

fn decode<T: Payload + DeserializeOwned>(bytes: &[u8]) -> Result<Message, RegistryError> {
    bincode::deserialize::<T>(bytes)
        .map(Message::new)
        .map_err(|e| RegistryError::Codec(e.to_string()))
}

impl TypeDescriptor {
    /// Describes `T` under `name`. The id is filled in on registration.
    pub fn of<T>(name: impl Into<String>) -> Self
    where
        T: Payload + Serialize + DeserializeOwned,
    {
        Self {
            type_id: 0,
            name: name.into(),
            rust_type: TypeId::of::<T>(),
            serialize: encode::<T>,
            deserialize: decode::<T>,
        }
    }

    pub fn serialize(&self, msg: &Message) -> Result<Vec<u8>, RegistryError> {
        (self.serialize)(msg)
    }

    pub fn deserialize(&self, bytes: &[u8]) -> Result<Message, RegistryError> {
        (self.deserialize)(bytes)
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("type_id", &self.type_id)
            .field("name", &self.name)
            .finish()
    }
}

/// Immutable view of the table. Writers publish a new one; readers never lock.
#[derive(Default, Clone)]
struct Snapshot {
    slots: BTreeMap<u32, TypeDescriptor>,
    by_type: HashMap<TypeId, u32>,
}

static REGISTRY: Lazy<ArcSwap<Snapshot>> = Lazy::new(|| ArcSwap::from_pointee(Snapshot::default()));

// Serializes writers so concurrent registrations do not lose each other's slots.
static WRITER: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Registers `descriptors` under the ids `first_id..first_id + len`.
///
/// Every slot is validated before any is written, so a conflict leaves the
/// table untouched.
pub fn try_register(first_id: u32, descriptors: Vec<TypeDescriptor>) -> Result<(), RegistryError> {
    let out_of_range = || RegistryError::IdOutOfRange {
        first_id,
        len: descriptors.len(),
    };
    let len = u32::try_from(descriptors.len()).map_err(|_| out_of_range())?;
    if len > 0 {
        first_id.checked_add(len - 1).ok_or_else(out_of_range)?;
    }

    let _writer = WRITER.lock();
    let current = REGISTRY.load();

    for (offset, descriptor) in (0..len).zip(descriptors.iter()) {
        let id = first_id + offset;
        if let Some(existing) = current.slots.get(&id) {
            if existing.name != descriptor.name {
                return Err(RegistryError::Conflict {
                    id,
                    existing: existing.name.clone(),
                    attempted: descriptor.name.clone(),
                });
            }
        }
    }

    let mut next = Snapshot::clone(&**current);
    for (offset, mut descriptor) in (0..len).zip(descriptors) {
        let id = first_id + offset;
        if next.slots.contains_key(&id) {
            continue;
        }
        descriptor.type_id = id;
        debug!(type_id = id, name = %descriptor.name, "Type registered");
        next.by_type.entry(descriptor.rust_type).or_insert(id);
        next.slots.insert(id, descriptor);
    }
    REGISTRY.store(Arc::new(next));
    Ok(())
}

/// Like [`try_register`], but a conflicting id is fatal.
pub fn register(first_id: u32, descriptors: Vec<TypeDescriptor>) {
    if let Err(e) = try_register(first_id, descriptors) {
        error!(error = %e, "Type registry conflict");
        eprintln!("FATAL: {e}");
        std::process::abort();
    }
}

/// The descriptor bound to `id`, if any.
pub fn lookup(id: u32) -> Option<TypeDescriptor> {
    REGISTRY.load().slots.get(&id).cloned()
}

/// Reverse lookup by Rust type.
pub fn id_of<T: 'static>() -> Option<u32> {
    REGISTRY.load().by_type.get(&TypeId::of::<T>()).copied()
}

/// Serializes a message through the descriptor of its registered type.
pub fn serialize(msg: &Message) -> Result<(u32, Vec<u8>), RegistryError> {
    let id = msg
        .type_id()
        .ok_or(RegistryError::NotRegistered(msg.type_name()))?;
    let descriptor = lookup(id).ok_or(RegistryError::UnknownType(id))?;
    Ok((id, descriptor.serialize(msg)?))
}

pub fn deserialize(id: u32, bytes: &[u8]) -> Result<Message, RegistryError> {
    lookup(id)
        .ok_or(RegistryError::UnknownType(id))?
        .deserialize(bytes)
}

/// Declares a contiguous block of type ids.
///
/// ```rust,ignore
/// type_id_block!(chat, 1000, [Join, Post, Leave]);
/// register_chat_types(); // Join = 1000, Post = 1001, Leave = 1002
/// ```
#[macro_export]
macro_rules! type_id_block {
    ($block:ident, $first:expr, [$($ty:ty),+ $(,)?]) => {
        $crate::__private::paste! {
            #[allow(dead_code)]
            pub fn [<register_ $block _types>]() {
                $crate::registry::register(
                    $first,
                    vec![$($crate::registry::TypeDescriptor::of::<$ty>(stringify!($ty))),+],
                );
            }
        }
    };
}
