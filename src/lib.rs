pub mod bots;
pub mod errors;
pub mod init;
pub mod logging;
pub mod repobot_config;
pub mod util;
