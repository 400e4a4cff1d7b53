pub mod attendance;
pub mod core;
pub mod courses;
pub mod dashboard;
pub mod lecturers;
pub mod queries;
pub mod reports;
pub mod sessions;
pub mod students;
