//! `define_id!`: prefixed ULID newtypes.

/// Declare an identifier type rendered as `{prefix}_{ulid}`.
///
/// Parsing is strict: an id of another kind is rejected with
/// [`IdError::WrongKind`](crate::IdError::WrongKind). Serde uses the string
/// form, so ids round-trip through JSON payloads and `TEXT` columns alike.
///
/// ```ignore
/// define_id!(HostId, "host");
///
/// let parsed: HostId = "host_01HV4Z2WQXKJNM8GPQY6VBKC3D".parse()?;
/// ```
#[macro_export]
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name($crate::Ulid);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            #[must_use]
            pub fn new() -> Self {
                Self($crate::Ulid::new())
            }

            pub fn parse(raw: &str) -> Result<Self, $crate::IdError> {
                match raw.split_once('_') {
                    _ if raw.is_empty() => Err($crate::IdError::Empty),
                    None => Err($crate::IdError::MissingSeparator),
                    Some((prefix, _)) if prefix != Self::PREFIX => Err($crate::IdError::WrongKind {
                        expected: Self::PREFIX,
                        found: prefix.to_string(),
                    }),
                    Some((_, ulid)) => $crate::Ulid::from_string(ulid)
                        .map(Self)
                        .map_err(|e| $crate::IdError::InvalidUlid(e.to_string())),
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(Self::PREFIX)?;
                f.write_str("_")?;
                ::std::fmt::Display::fmt(&self.0, f)
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                Self::parse(raw)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = $crate::IdError;

            fn try_from(raw: &str) -> Result<Self, Self::Error> {
                Self::parse(raw)
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = <::std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
                Self::parse(&raw).map_err(serde::de::Error::custom)
            }
        }
    };
}
