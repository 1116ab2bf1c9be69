pub mod api;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod loader;
pub mod locks;
pub mod model;
pub mod normalize;
pub mod registry;
pub mod telemetry;
pub mod template;
