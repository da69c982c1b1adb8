mod credentials;
mod doctor;
mod logs;
mod status;
mod stop;
mod up;

pub use credentials::run_credentials;
pub use doctor::run_doctor;
pub use logs::run_logs;
pub use status::run_status;
pub use stop::run_stop;
pub use up::run_up;
