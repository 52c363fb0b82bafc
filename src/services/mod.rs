pub mod attendance_service;
pub mod clock;
pub mod daily_aggregation;
