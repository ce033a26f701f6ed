//! Image reference parsing.
//!
//! Turns a function's `image` field such as `ghcr.io/acme/hello:v1` into
//! registry, repository and tag.

use fnbuild_core::error::{FnError, Result};

const DEFAULT_REGISTRY: &str = "docker.io";

const DEFAULT_TAG: &str = "latest";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry host, with port if given
    pub registry: String,
    pub repository: String,
    pub tag: String,
}

impl ImageReference {
    /// Parse a reference.
    ///
    /// The first path component is a registry when it contains `.` or `:` or
    /// is `localhost`; otherwise Docker Hub is assumed and single-component
    /// names gain the `library/` prefix. Digest references are rejected since
    /// pushing always targets a tag.
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(FnError::InvalidReference(
                "function does not declare an image".to_string(),
            ));
        }
        if reference.contains('@') {
            return Err(FnError::InvalidReference(format!(
                "'{}': push requires a tag, not a digest",
                reference
            )));
        }

        let last_slash = reference.rfind('/').map(|p| p + 1).unwrap_or(0);
        let (name, tag) = match reference[last_slash..].rfind(':') {
            Some(colon) => {
                let split = last_slash + colon;
                (&reference[..split], &reference[split + 1..])
            }
            None => (reference, DEFAULT_TAG),
        };
        if tag.is_empty() {
            return Err(FnError::InvalidReference(format!(
                "'{}': empty tag",
                reference
            )));
        }

        let (registry, repository) = match name.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (first.to_string(), rest.to_string())
            }
            Some(_) => (DEFAULT_REGISTRY.to_string(), name.to_string()),
            None => (DEFAULT_REGISTRY.to_string(), format!("library/{}", name)),
        };

        let valid = !repository.is_empty()
            && repository.split('/').all(|part| {
                !part.is_empty()
                    && part
                        .chars()
                        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "._-".contains(c))
            });
        if !valid {
            return Err(FnError::InvalidReference(format!(
                "'{}': invalid repository '{}'",
                reference, repository
            )));
        }

        Ok(Self {
            registry,
            repository,
            tag: tag.to_string(),
        })
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.repository, self.tag)
    }
}
