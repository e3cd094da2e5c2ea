//! In-process repository implementations.

mod memory;

pub use memory::InMemoryPostsRepo;
