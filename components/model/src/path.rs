use std::fmt::{self, Display, Formatter};

use crate::error::ModelError;

/// Path of a segment in the metadata store: `project/segment-index/bucket/encrypted-path`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentPath(String);

/// Identifier order limits are scoped to: `project/bucket`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketScope(String);

impl SegmentPath {
    pub fn new<P>(path: P) -> Self
    where
        P: AsRef<str>,
    {
        Self(path.as_ref().to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive the bucket scope from the project and bucket components of the path.
    pub fn bucket_scope(&self) -> Result<BucketScope, ModelError> {
        let components: Vec<&str> = self.0.splitn(4, '/').collect();
        if components.len() < 3 {
            return Err(ModelError::NoBucketComponent(self.0.clone()));
        }
        Ok(BucketScope(format!("{}/{}", components[0], components[2])))
    }
}

impl Display for SegmentPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl BucketScope {
    pub fn new<S>(scope: S) -> Self
    where
        S: AsRef<str>,
    {
        Self(scope.as_ref().to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for BucketScope {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::SegmentPath;
    use crate::error::ModelError;

    #[test]
    fn test_bucket_scope() {
        let path = SegmentPath::new("project-a/s0/photos/enc/a/b");
        assert_eq!("project-a/photos", path.bucket_scope().unwrap().as_str());

        let path = SegmentPath::new("project-a/l/photos");
        assert_eq!("project-a/photos", path.bucket_scope().unwrap().as_str());

        let path = SegmentPath::new("project-a/l");
        assert_eq!(
            ModelError::NoBucketComponent("project-a/l".to_owned()),
            path.bucket_scope().unwrap_err()
        );
    }
}
