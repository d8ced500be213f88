//! # Portal (campus self-service backend)
//!
//! `portal` lets students and employees manage their institutional account
//! without a helpdesk ticket.
//!
//! ## Accounts
//!
//! Accounts are provisioned as `pending` and become `active` once the owner
//! confirms their institutional email, registers a backup email and sets a
//! password. Passwords and recovery PINs are stored as Argon2id PHC strings.
//!
//! ## Directory sync
//!
//! The institutional LDAP directory holds the authoritative credential. Every
//! password write goes to the directory first; when it is unreachable the
//! local record is still updated and flagged `ldap_synced = false`, and a
//! background sweep pushes it again later.
//!
//! ## Recovery
//!
//! A forgotten password is reset through a four-step wizard
//! (`identify → verify → reset → success`) over one of three channels: a
//! code mailed to the backup address, a recovery PIN, or a TOTP code.
//!
//! ## Devices
//!
//! Devices are registered by MAC address. Addresses are normalized to twelve
//! uppercase hex digits and the manufacturer is resolved from a local OUI
//! table, falling back to public lookup services.

pub mod api;
pub mod cli;
pub mod directory;
pub mod email;
pub mod mac;
pub mod password;
pub mod recovery;
pub mod store;
pub mod sync;
pub mod totp;

#[cfg(test)]
mod testing;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
