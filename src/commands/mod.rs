pub mod clean;
pub mod pull;
pub mod shift_tz;
pub mod status;
