use std::fmt;

/// A sub-protocol a draft is willing to speak (`Sec-WebSocket-Protocol`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubProtocol {
    name: String,
}

impl SubProtocol {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the comma-separated `offered` list names this protocol.
    #[must_use]
    pub fn accepts(&self, offered: &str) -> bool {
        offered.split(',').map(str::trim).any(|token| token == self.name)
    }
}

impl From<&str> for SubProtocol {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for SubProtocol {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for SubProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
