//! Process exit codes.
//!
//! Scripts can tell "wrong secret" from "nothing to restore" without
//! parsing stderr. 2 is left to clap for usage errors.

pub const SUCCESS: u8 = 0;
pub const GENERAL_ERROR: u8 = 1;
pub const AUTH_FAILED: u8 = 3;
pub const NOT_FOUND: u8 = 4;
pub const CONFLICT: u8 = 5;
pub const VAULT_INVALID: u8 = 6;
pub const VERIFY_FAILED: u8 = 7;
pub const PERMISSION_DENIED: u8 = 8;
