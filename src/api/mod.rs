pub mod attendance;
pub mod forms;
pub mod geofence;
pub mod reports;
pub mod users;
