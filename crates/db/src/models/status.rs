//! Status helper enums mapping to SMALLINT lookup tables.
//!
//! Each variant's discriminant matches the seed order (1-based) of the
//! corresponding `*_statuses` table.

/// Status ID type matching SMALLINT/SMALLSERIAL in the database.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:literal => $label:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }

            /// Map a stored status ID back to the enum.
            pub fn from_id(id: StatusId) -> Option<Self> {
                match id {
                    $( $val => Some($name::$variant), )+
                    _ => None,
                }
            }

            /// Lookup-table `name` for the status.
            pub fn label(self) -> &'static str {
                match self {
                    $( $name::$variant => $label, )+
                }
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.label())
            }
        }
    };
}

define_status_enum! {
    /// Outcome recorded in the `processed_messages` ledger.
    MessageStatus {
        Processed = 1 => "processed",
        Ignored = 2 => "ignored",
        Failed = 3 => "failed",
    }
}

define_status_enum! {
    /// Deferred extension task lifecycle.
    TaskStatus {
        Pending = 1 => "pending",
        Running = 2 => "running",
        Completed = 3 => "completed",
        Failed = 4 => "failed",
    }
}
