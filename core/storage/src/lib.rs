//! Cloud drive access for drivelink.
//!
//! The [`onedrive`] module talks to OneDrive through Microsoft Graph. A
//! [`DriveClient`] sends one authenticated request per operation and reports
//! every outcome through [`drivelink_common::Result`]; a [`TokenProvider`]
//! keeps the bearer token for the signed-in account.

pub mod onedrive;

pub use onedrive::{
    ConflictBehavior, DriveClient, DriveConfig, DriveItem, DriveRoot, FileItem, FolderItem,
    TokenProvider,
};
