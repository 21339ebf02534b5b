//! OneDrive storage client for drivelink.
//!
//! This module provides access to a OneDrive drive through Microsoft Graph:
//! - OAuth2 sign-in with a single cached account and silent renewal
//! - Path-addressed lookups, uploads and folder creation
//! - ID-addressed rename and delete
//! - Typed file/folder items selected from the response shape

pub mod auth;
pub mod client;
pub mod model;

pub use auth::{
    Account, AuthConfig, AuthManager, IdentityClient, InteractiveDelegate, OAuthIdentityClient,
    StaticTokenSource, Token, TokenProvider, TokenSource, GRAPH_SCOPES,
};
pub use client::{DriveClient, DriveConfig, DriveRoot, GRAPH_DRIVE_BASE};
pub use model::{
    ConflictBehavior, DriveItem, FileItem, FolderItem, FolderView, ItemInfo, ParentReference,
};
