pub mod attendance;
pub mod daily_aggregate;
pub mod forms;
pub mod geofence;
pub mod role;
pub mod user;
