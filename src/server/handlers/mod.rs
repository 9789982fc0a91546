pub mod auth;
pub mod dashboard;
pub mod files;
pub mod home;
pub mod shared;
pub mod uploads;
