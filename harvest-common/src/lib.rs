pub mod extract;
pub mod loader;
pub mod metrics;
pub mod params;
pub mod redis;
pub mod search;
pub mod seen;
