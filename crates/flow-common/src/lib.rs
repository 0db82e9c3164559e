// Identifiers and small shared types used by every flow crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid id: {0}")]
    InvalidId(String),
    #[error("config error: {0}")]
    Config(String),
}

pub mod ids {
    // Typed IDs so a stream id can never be passed where a node id is expected.
    use super::{Error, Result};
    use serde::{Deserialize, Serialize};
    use std::fmt;
    use std::str::FromStr;
    use uuid::Uuid;

    /// Identifies one distributed query execution instance.
    ///
    /// ```
    /// use flow_common::ids::FlowId;
    /// use std::str::FromStr;
    ///
    /// let flow = FlowId::new();
    /// let parsed = FlowId::from_str(&flow.to_string()).expect("parse");
    /// assert_eq!(flow, parsed);
    /// ```
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
    pub struct FlowId(Uuid);

    impl FlowId {
        pub fn new() -> Self {
            Self(Uuid::new_v4())
        }

        pub fn from_uuid(uuid: Uuid) -> Self {
            Self(uuid)
        }

        pub fn as_uuid(&self) -> Uuid {
            self.0
        }
    }

    impl Default for FlowId {
        fn default() -> Self {
            Self::new()
        }
    }

    impl fmt::Display for FlowId {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl FromStr for FlowId {
        type Err = Error;

        fn from_str(input: &str) -> Result<Self> {
            let uuid = Uuid::parse_str(input).map_err(|_| Error::InvalidId(input.into()))?;
            Ok(Self(uuid))
        }
    }

    macro_rules! int_id_type {
        ($name:ident, $prefix:literal) => {
            #[derive(
                Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize,
                Deserialize,
            )]
            #[serde(transparent)]
            pub struct $name(pub u32);

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}{}", $prefix, self.0)
                }
            }

            impl FromStr for $name {
                type Err = Error;

                fn from_str(input: &str) -> Result<Self> {
                    // Accept both the bare number and the prefixed display form.
                    let digits = input.strip_prefix($prefix).unwrap_or(input);
                    digits
                        .parse::<u32>()
                        .map(Self)
                        .map_err(|_| Error::InvalidId(input.into()))
                }
            }
        };
    }

    // Stream ids are scoped to a flow; node ids are cluster-wide.
    int_id_type!(StreamId, "s");
    int_id_type!(NodeId, "n");
}
