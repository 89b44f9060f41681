pub mod auth;
pub mod constants;
pub mod crypto;
pub mod decrypt;
pub mod download;
pub mod fus;
pub mod imei;
pub mod logic;
pub mod message;
pub mod version;

#[cfg(test)]
mod test_server;
