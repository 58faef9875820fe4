//! Transports and the visibility rules applied to them.

use std::fmt;

use crate::rpc::registry::Visibility;

/// The trust boundary a request arrived through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    /// Reachable by untrusted external callers.
    Public,
    /// Reachable only by trusted in-process or in-cluster callers.
    Internal,
}

impl Transport {
    /// All transports, in table order.
    pub const ALL: [Transport; 2] = [Transport::Public, Transport::Internal];

    const fn index(self) -> usize {
        match self {
            Self::Public => 0,
            Self::Internal => 1,
        }
    }

    /// Returns the label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Internal => "internal",
        }
    }

    /// Returns `true` if a method with `visibility` may be invoked over this transport.
    #[must_use]
    pub const fn allows(self, visibility: Visibility) -> bool {
        VISIBILITY_MATRIX[self.index()][visibility.index()]
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Rows: transport. Columns: [public, server-only].
const VISIBILITY_MATRIX: [[bool; 2]; 2] = [
    // public transport
    [true, false],
    // internal transport
    [true, true],
];
