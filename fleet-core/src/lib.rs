pub mod command_result;
pub mod countdown;
pub mod cron;
pub mod error;
pub mod ext;
pub mod host;
pub mod local_host;
pub mod server_info;
pub mod setting;
pub mod timer;
pub mod util;
