//! Distributed de-duplication of action handling.
//!
//! When several agent processes watch the same feed, each action must be
//! approved by only one of them. [`ActionDedupCoordinator`] implements the
//! claim protocol over two capabilities, a [`SharedCache`] and a
//! [`DistributedLock`], with Redis and in-memory implementations.

pub mod backend;
pub mod coordinator;
pub mod memory;
pub mod redis;

pub use backend::{BackendError, DistributedLock, LockHandle, SharedCache};
pub use coordinator::{ActionClaim, ActionDedupCoordinator, DedupConfig, DedupError};
pub use memory::{InMemoryBackend, MemoryMutex};
pub use self::redis::{RedisBackend, RedisLockConfig, RedisMutex};
