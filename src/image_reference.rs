use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

#[derive(Debug)]
pub enum ParseError {
    Empty,
    MissingRegistry,
    MissingRepository,
    InvalidDigest(String),
    InvalidCharacter(char),
    InvalidFormat(String),
}

impl std::error::Error for ParseError {}
impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Empty => write!(f, "image reference is empty"),
            ParseError::MissingRegistry => write!(f, "registry is missing"),
            ParseError::MissingRepository => write!(f, "repository is missing"),
            ParseError::InvalidDigest(digest) => write!(f, "invalid digest: {}", digest),
            ParseError::InvalidCharacter(c) => {
                write!(f, "invalid character {:?} in image reference", c)
            }
            ParseError::InvalidFormat(image) => write!(f, "invalid image format: {}", image),
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

impl ImageReference {
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        if s.is_empty() {
            return Err(ParseError::Empty);
        }

        // Conservative charset; in particular no whitespace and no shell
        // metacharacters, the reference becomes a process argument later
        if let Some(c) = s
            .chars()
            .find(|c| !c.is_ascii_alphanumeric() && !matches!(c, '-' | '_' | '.' | ':' | '/' | '@'))
        {
            return Err(ParseError::InvalidCharacter(c));
        }

        // Split off a digest suffix first, "repo@sha256:..." keeps its colon
        let (without_digest, digest) = match s.split_once('@') {
            Some((head, digest)) => {
                match digest.split_once(':') {
                    Some((algorithm, hex)) if !algorithm.is_empty() && !hex.is_empty() => {}
                    _ => return Err(ParseError::InvalidDigest(digest.to_string())),
                }
                (head, Some(digest.to_string()))
            }
            None => (s, None),
        };

        // A tag is a colon after the last slash; a colon before it belongs
        // to a registry port
        let (without_tag, tag) = if let Some(pos) = without_digest.rfind(':') {
            let last_slash = without_digest.rfind('/').unwrap_or(0);
            if pos > last_slash {
                (
                    &without_digest[..pos],
                    Some(without_digest[pos + 1..].to_string()),
                )
            } else {
                (without_digest, None)
            }
        } else {
            (without_digest, None)
        };

        if let Some(tag) = &tag {
            if tag.is_empty() {
                return Err(ParseError::InvalidFormat(s.to_string()));
            }
        }

        // Split into registry and repository by the first slash
        let parts: Vec<&str> = without_tag.splitn(2, '/').collect();
        if parts.len() != 2 {
            return Err(ParseError::InvalidFormat(s.to_string()));
        }

        let registry = parts[0];
        let repository = parts[1];

        if registry.is_empty() {
            return Err(ParseError::MissingRegistry);
        }
        if repository.is_empty() || repository.ends_with('/') {
            return Err(ParseError::MissingRepository);
        }

        // ctr needs a fully qualified reference; an untagged one gets the
        // conventional default
        let tag = match (&tag, &digest) {
            (None, None) => Some("latest".to_string()),
            _ => tag,
        };

        Ok(Self {
            registry: registry.to_string(),
            repository: repository.to_string(),
            tag,
            digest,
        })
    }
}
