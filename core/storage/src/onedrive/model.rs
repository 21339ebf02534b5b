//! Drive item model for the Graph drive API.
//!
//! Items come back from the API as a single JSON shape. Whether a payload is a
//! folder is decided structurally: a non-null `"folder"` facet makes it a
//! [`FolderItem`], anything else is treated as a [`FileItem`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

use drivelink_common::{Error, Result};

/// Reference to the folder containing an item.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentReference {
    /// Drive holding the parent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drive_id: Option<String>,
    /// Parent item ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Parent name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Percent-encoded path of the parent, e.g. `/drive/root:/Apps`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Attributes shared by files and folders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemInfo {
    /// Server-assigned identifier used by delete and rename.
    #[serde(default)]
    pub id: String,
    /// Item name.
    #[serde(default)]
    pub name: String,
    /// Created time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_date_time: Option<DateTime<Utc>>,
    /// Modified time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified_date_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_reference: Option<ParentReference>,
    /// Browser URL for the item.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_url: Option<String>,
}

/// The `file` facet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFacet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Display preferences of a folder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderView {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<String>,
}

/// The `folder` facet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderFacet {
    #[serde(default)]
    pub child_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view: Option<FolderView>,
}

/// A file stored in the drive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileItem {
    #[serde(flatten)]
    pub info: ItemInfo,
    /// Size in bytes.
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<FileFacet>,
}

impl FileItem {
    /// MIME type reported by the server, if any.
    pub fn mime_type(&self) -> Option<&str> {
        self.file.as_ref().and_then(|f| f.mime_type.as_deref())
    }
}

/// A folder stored in the drive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderItem {
    #[serde(flatten)]
    pub info: ItemInfo,
    pub folder: FolderFacet,
}

impl FolderItem {
    /// Number of direct children.
    pub fn child_count(&self) -> u64 {
        self.folder.child_count
    }

    pub fn view(&self) -> Option<&FolderView> {
        self.folder.view.as_ref()
    }
}

/// A drive item: exactly one of file or folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriveItem {
    File(FileItem),
    Folder(FolderItem),
}

impl DriveItem {
    /// Parse a JSON response body into an item.
    ///
    /// # Errors
    /// - Body is not valid JSON, or not a JSON object
    /// - The selected variant rejects a field's type
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| Error::Serialization(format!("Invalid item JSON: {}", e)))?;
        Self::from_value(value)
    }

    /// Select the variant from an already parsed JSON value.
    pub fn from_value(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(Error::Serialization(
                "Drive item must be a JSON object".to_string(),
            ));
        }

        let is_folder = value.get("folder").is_some_and(|f| !f.is_null());

        if is_folder {
            serde_json::from_value(value)
                .map(DriveItem::Folder)
                .map_err(|e| Error::Serialization(format!("Invalid folder item: {}", e)))
        } else {
            serde_json::from_value(value)
                .map(DriveItem::File)
                .map_err(|e| Error::Serialization(format!("Invalid file item: {}", e)))
        }
    }

    /// Serialize back into the API's JSON shape.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize item: {}", e)))
    }

    /// Shared attributes.
    pub fn info(&self) -> &ItemInfo {
        match self {
            DriveItem::File(file) => &file.info,
            DriveItem::Folder(folder) => &folder.info,
        }
    }

    pub fn id(&self) -> &str {
        &self.info().id
    }

    pub fn name(&self) -> &str {
        &self.info().name
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, DriveItem::Folder(_))
    }

    fn kind(&self) -> &'static str {
        match self {
            DriveItem::File(_) => "file",
            DriveItem::Folder(_) => "folder",
        }
    }

    /// Narrow to a file.
    ///
    /// # Errors
    /// - `TypeMismatch` if the item is a folder
    pub fn into_file(self) -> Result<FileItem> {
        match self {
            DriveItem::File(file) => Ok(file),
            other => Err(Error::TypeMismatch {
                expected: "file",
                found: other.kind(),
            }),
        }
    }

    /// Narrow to a folder.
    ///
    /// # Errors
    /// - `TypeMismatch` if the item is a file
    pub fn into_folder(self) -> Result<FolderItem> {
        match self {
            DriveItem::Folder(folder) => Ok(folder),
            other => Err(Error::TypeMismatch {
                expected: "folder",
                found: other.kind(),
            }),
        }
    }
}

impl Serialize for DriveItem {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            DriveItem::File(file) => file.serialize(serializer),
            DriveItem::Folder(folder) => folder.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for DriveItem {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        DriveItem::from_value(value).map_err(serde::de::Error::custom)
    }
}

/// Server-side handling of a name collision when creating an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictBehavior {
    /// Reject the request with a conflict.
    #[default]
    Fail,
    /// Overwrite the existing item.
    Replace,
    /// Pick a new unique name.
    Rename,
}

impl ConflictBehavior {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictBehavior::Fail => "fail",
            ConflictBehavior::Replace => "replace",
            ConflictBehavior::Rename => "rename",
        }
    }
}

impl fmt::Display for ConflictBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConflictBehavior {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fail" => Ok(ConflictBehavior::Fail),
            "replace" => Ok(ConflictBehavior::Replace),
            "rename" => Ok(ConflictBehavior::Rename),
            other => Err(Error::InvalidInput(format!(
                "Unknown conflict behavior '{}'. Use: fail, replace, or rename",
                other
            ))),
        }
    }
}

/// One page of a child collection.
#[derive(Debug, Deserialize)]
pub(crate) struct ChildrenPage {
    #[serde(default)]
    pub value: Vec<DriveItem>,
    #[serde(rename = "@odata.nextLink", default)]
    pub next_link: Option<String>,
}

/// Body of a rename request.
#[derive(Debug, Serialize)]
pub(crate) struct RenameRequest<'a> {
    pub name: &'a str,
}

/// Body of a create-folder request.
#[derive(Debug, Serialize)]
pub(crate) struct CreateFolderRequest<'a> {
    pub name: &'a str,
    pub folder: FolderMarker,
    #[serde(rename = "@microsoft.graph.conflictBehavior")]
    pub conflict_behavior: ConflictBehavior,
}

/// Serializes as `{}`; marks the new item as a folder.
#[derive(Debug, Serialize)]
pub(crate) struct FolderMarker {}
