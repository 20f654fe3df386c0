// src/lib.rs
pub use monitor_service;
pub use network_service;
pub use shared;
pub use storage_service;
