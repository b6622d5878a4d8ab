pub mod telemetry;
pub mod weather;

pub const ROOM_DATA_TOOL: &str = "get_room_data";
pub const DEVICE_DATA_TOOL: &str = "get_device_data";
pub const WEATHER_TOOL: &str = "get_weather_data";
