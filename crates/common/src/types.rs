use serde::{Deserialize, Serialize};

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wraps a raw database identifier.
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            /// Returns the raw identifier.
            pub const fn as_i64(&self) -> i64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

numeric_id!(
    /// Identifier of a site row.
    SiteId
);

numeric_id!(
    /// Identifier of a user. Users are owned by the identity layer; the
    /// engine only reads them by id.
    UserId
);

numeric_id!(
    /// Identifier of a site template.
    TemplateId
);

numeric_id!(
    /// Identifier of a billing plan.
    PlanId
);

numeric_id!(
    /// Monotonically increasing identifier of an outbox row.
    OutboxId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_preserve_raw_value() {
        let id = SiteId::new(42);
        assert_eq!(id.as_i64(), 42);
        assert_eq!(i64::from(id), 42);
        assert_eq!(SiteId::from(42), id);
    }

    #[test]
    fn ids_display_as_number() {
        assert_eq!(UserId::new(7).to_string(), "7");
        assert_eq!(OutboxId::new(1001).to_string(), "1001");
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_string(&TemplateId::new(3)).unwrap();
        assert_eq!(json, "3");
        let back: TemplateId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, TemplateId::new(3));
    }

    #[test]
    fn outbox_ids_order_by_value() {
        assert!(OutboxId::new(1) < OutboxId::new(2));
    }
}
