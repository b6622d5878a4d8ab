pub mod builtin;
pub mod registry;

pub use builtin::{DEVICE_DATA_TOOL, ROOM_DATA_TOOL, WEATHER_TOOL};
pub use registry::ToolRegistry;
