pub mod codec;
pub mod config;
pub mod db_keys;
pub mod logging;
