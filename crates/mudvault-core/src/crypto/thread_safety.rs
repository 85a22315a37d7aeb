//! `Send`/`Sync` for [`RootKey`].
//!
//! `MemSafe` holds a raw pointer to its locked page, which opts it out of the
//! auto traits. Every read of that page goes through the `RwLock` in
//! `RootKey`, and the mlock/mprotect calls it performs are thread-safe, so the
//! key can be shared across the blocking pool and async tasks.

use super::keys::RootKey;

// SAFETY: the only field is an RwLock around the MemSafe region; the raw
// pointer is never dereferenced without holding that lock.
unsafe impl Send for RootKey {}

// SAFETY: shared access is serialized by the same RwLock.
unsafe impl Sync for RootKey {}
