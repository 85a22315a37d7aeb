pub mod init;
pub mod pull;
pub mod push;
pub mod status;
pub mod verify;
