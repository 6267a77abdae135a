pub mod db;
pub mod email;
pub mod notify;
