use serde::{de, ser};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use type_uuid::TypeUuid;
use uuid::Uuid;

/// Identifies a resource type. Every resource type declares a UUID on the struct itself (via
/// `TypeUuid`), and factories are registered against it.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Ord, PartialOrd, Default)]
pub struct ResourceTypeId(pub Uuid);
impl ResourceTypeId {
    pub fn of<T: TypeUuid>() -> Self {
        ResourceTypeId::from_bytes(T::UUID)
    }

    pub fn parse_str(input: &str) -> Result<Self, uuid::Error> {
        Ok(ResourceTypeId(Uuid::parse_str(input)?))
    }

    pub fn from_u128(u: u128) -> Self {
        Self(Uuid::from_u128(u))
    }

    pub fn from_bytes(bytes: uuid::Bytes) -> Self {
        ResourceTypeId(Uuid::from_bytes(bytes))
    }
}

impl fmt::Debug for ResourceTypeId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_tuple("ResourceTypeId")
            .field(&self.0)
            .finish()
    }
}

impl fmt::Display for ResourceTypeId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Serialize for ResourceTypeId {
    fn serialize<S: ser::Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_string())
        } else {
            self.0.serialize(serializer)
        }
    }
}

struct ResourceTypeIdVisitor;

impl<'a> de::Visitor<'a> for ResourceTypeIdVisitor {
    type Value = ResourceTypeId;

    fn expecting(
        &self,
        fmt: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(fmt, "a UUID-formatted string")
    }

    fn visit_str<E: de::Error>(
        self,
        s: &str,
    ) -> Result<Self::Value, E> {
        Uuid::from_str(s)
            .map(ResourceTypeId)
            .map_err(|_| de::Error::invalid_value(de::Unexpected::Str(s), &self))
    }
}

impl<'de> Deserialize<'de> for ResourceTypeId {
    fn deserialize<D: de::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            deserializer.deserialize_string(ResourceTypeIdVisitor)
        } else {
            Ok(ResourceTypeId(Uuid::deserialize(deserializer)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ResourceTypeId;
    use std::collections::HashMap;
    use type_uuid::TypeUuid;

    #[derive(TypeUuid)]
    #[uuid = "6a3c1bd4-77f3-4bd4-9b0e-8e1f5c3d2a10"]
    struct Marker;

    #[test]
    fn of_matches_declared_uuid() {
        let id = ResourceTypeId::of::<Marker>();
        assert_eq!(
            id,
            ResourceTypeId::parse_str("6a3c1bd4-77f3-4bd4-9b0e-8e1f5c3d2a10").unwrap()
        );
    }

    #[test]
    fn usable_as_json_map_key() {
        let mut budgets = HashMap::new();
        budgets.insert(ResourceTypeId::of::<Marker>(), 1024usize);
        let json = serde_json::to_string(&budgets).unwrap();
        assert!(json.contains("6a3c1bd4-77f3-4bd4-9b0e-8e1f5c3d2a10"));
        let parsed: HashMap<ResourceTypeId, usize> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, budgets);
    }
}
