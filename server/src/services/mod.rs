pub mod map_broker;
pub mod map_cache_evictor;
pub mod stall_poller;
