//! Common types used throughout drivelink.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::fmt;

use crate::{Error, Result};

/// Characters escaped inside a single path segment of a drive URL.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// A slash-delimited path to an item, relative to a drive root.
///
/// This is the human-readable address used for lookups, uploads and folder
/// creation. Mutations that take a server-assigned identifier do not use it.
/// `.` and `..` never appear as components, so an encoded path cannot climb
/// out of the root it is resolved against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DrivePath {
    components: Vec<String>,
}

fn check_component(component: &str) -> Result<()> {
    if component == "." || component == ".." {
        return Err(Error::InvalidInput(format!(
            "Path component '{}' is not allowed",
            component
        )));
    }
    Ok(())
}

impl DrivePath {
    /// Parse a path string into a DrivePath.
    ///
    /// Uses '/' as separator. Leading, trailing and repeated separators are
    /// dropped, so `"/a//b/"` and `"a/b"` name the same item.
    ///
    /// # Errors
    /// - `InvalidInput` if any component is `.` or `..`
    pub fn parse(path: &str) -> Result<Self> {
        let components = path
            .split('/')
            .filter(|c| !c.is_empty())
            .map(|c| check_component(c).map(|_| c.to_string()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { components })
    }

    /// Check if this is the root path.
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Join this path with a child component.
    ///
    /// # Errors
    /// - Returns error if the child is empty, contains a separator, or is a
    ///   dot segment
    pub fn join(&self, child: &str) -> Result<Self> {
        if child.is_empty() {
            return Err(Error::InvalidInput(
                "Child component cannot be empty".to_string(),
            ));
        }
        if child.contains('/') {
            return Err(Error::InvalidInput(
                "Child component cannot contain separators".to_string(),
            ));
        }
        check_component(child)?;

        let mut components = self.components.clone();
        components.push(child.to_string());
        Ok(Self { components })
    }

    /// Get the path components.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Percent-encode each component and join them with '/'.
    ///
    /// The result is suitable for splicing into a `root:/{path}` endpoint.
    pub fn encoded(&self) -> String {
        self.components
            .iter()
            .map(|c| utf8_percent_encode(c, SEGMENT).to_string())
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl fmt::Display for DrivePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.components.join("/"))
    }
}
