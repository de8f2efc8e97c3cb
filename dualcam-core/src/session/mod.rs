pub mod compose_worker;
pub mod composition_cache;
pub mod coordinator;
pub mod sync;
