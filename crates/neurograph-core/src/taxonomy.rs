//! Canonical noun and verb taxonomies.
//!
//! Entity types are a closed set: unknown wire names are rejected at the API
//! boundary with `InvalidArgument` rather than smuggled through as free-form
//! strings. Wire names are camelCase and stable across releases.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

macro_rules! taxonomy {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $wire:literal,)+ }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $name {
            $($variant,)+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant,)+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s {
                    $($wire => Ok($name::$variant),)+
                    other => Err(format!("unknown {} '{}'", stringify!($name), other)),
                }
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(D::Error::custom)
            }
        }
    };
}

taxonomy! {
    /// The 42 canonical noun types.
    NounType {
        Person => "person",
        Organization => "organization",
        Location => "location",
        Thing => "thing",
        Concept => "concept",
        Event => "event",
        Document => "document",
        File => "file",
        Message => "message",
        Task => "task",
        Project => "project",
        Meeting => "meeting",
        Team => "team",
        Product => "product",
        Service => "service",
        Customer => "customer",
        User => "user",
        Group => "group",
        List => "list",
        Topic => "topic",
        Skill => "skill",
        Role => "role",
        Goal => "goal",
        Metric => "metric",
        Account => "account",
        Application => "application",
        Device => "device",
        Dataset => "dataset",
        Model => "model",
        Workflow => "workflow",
        Process => "process",
        Resource => "resource",
        Transaction => "transaction",
        Content => "content",
        Collection => "collection",
        Category => "category",
        Tag => "tag",
        Note => "note",
        Comment => "comment",
        Activity => "activity",
        State => "state",
        Other => "other",
    }
}

taxonomy! {
    /// The 127 canonical verb types.
    VerbType {
        // Generic association
        RelatedTo => "relatedTo",
        References => "references",
        Mentions => "mentions",
        SimilarTo => "similarTo",
        OppositeOf => "oppositeOf",
        InstanceOf => "instanceOf",
        TypeOf => "typeOf",
        SameAs => "sameAs",
        DifferentFrom => "differentFrom",
        DerivedFrom => "derivedFrom",
        // Structure
        Contains => "contains",
        PartOf => "partOf",
        BelongsTo => "belongsTo",
        Has => "has",
        MemberOf => "memberOf",
        Includes => "includes",
        ComposedOf => "composedOf",
        AttachedTo => "attachedTo",
        ConnectedTo => "connectedTo",
        LinkedTo => "linkedTo",
        GroupedWith => "groupedWith",
        CategorizedAs => "categorizedAs",
        TaggedWith => "taggedWith",
        IndexedBy => "indexedBy",
        // Creation
        Created => "created",
        CreatedBy => "createdBy",
        Authored => "authored",
        AuthoredBy => "authoredBy",
        Generated => "generated",
        GeneratedBy => "generatedBy",
        Produced => "produced",
        ProducedBy => "producedBy",
        BuiltOn => "builtOn",
        BuiltBy => "builtBy",
        DevelopedBy => "developedBy",
        DesignedBy => "designedBy",
        Invented => "invented",
        InventedBy => "inventedBy",
        // Modification
        Updated => "updated",
        UpdatedBy => "updatedBy",
        Modified => "modified",
        ModifiedBy => "modifiedBy",
        Edited => "edited",
        EditedBy => "editedBy",
        Transformed => "transformed",
        TransformedBy => "transformedBy",
        Converted => "converted",
        ConvertedTo => "convertedTo",
        Replaced => "replaced",
        ReplacedBy => "replacedBy",
        Improved => "improved",
        ImprovedBy => "improvedBy",
        // Ownership and control
        Owns => "owns",
        OwnedBy => "ownedBy",
        Manages => "manages",
        ManagedBy => "managedBy",
        Controls => "controls",
        ControlledBy => "controlledBy",
        Maintains => "maintains",
        MaintainedBy => "maintainedBy",
        Supervises => "supervises",
        SupervisedBy => "supervisedBy",
        Leads => "leads",
        LedBy => "ledBy",
        Governs => "governs",
        GovernedBy => "governedBy",
        // Usage and dependency
        Uses => "uses",
        UsedBy => "usedBy",
        Requires => "requires",
        RequiredBy => "requiredBy",
        DependsOn => "dependsOn",
        DependencyOf => "dependencyOf",
        Supports => "supports",
        SupportedBy => "supportedBy",
        Implements => "implements",
        ImplementedBy => "implementedBy",
        Extends => "extends",
        ExtendedBy => "extendedBy",
        Integrates => "integrates",
        IntegratedWith => "integratedWith",
        // Social and organizational
        Knows => "knows",
        WorksWith => "worksWith",
        WorksFor => "worksFor",
        WorksAt => "worksAt",
        Employs => "employs",
        EmployedBy => "employedBy",
        CollaboratesWith => "collaboratesWith",
        ReportsTo => "reportsTo",
        Mentors => "mentors",
        MentoredBy => "mentoredBy",
        Follows => "follows",
        FollowedBy => "followedBy",
        Likes => "likes",
        LikedBy => "likedBy",
        // Spatial
        LocatedIn => "locatedIn",
        LocatedAt => "locatedAt",
        Near => "near",
        TravelsTo => "travelsTo",
        OriginatesFrom => "originatesFrom",
        DestinedFor => "destinedFor",
        Hosts => "hosts",
        HostedBy => "hostedBy",
        // Temporal and causal
        OccursBefore => "occursBefore",
        OccursAfter => "occursAfter",
        OccursDuring => "occursDuring",
        Scheduled => "scheduled",
        ScheduledFor => "scheduledFor",
        Triggers => "triggers",
        TriggeredBy => "triggeredBy",
        Causes => "causes",
        CausedBy => "causedBy",
        Prevents => "prevents",
        PreventedBy => "preventedBy",
        Enables => "enables",
        EnabledBy => "enabledBy",
        // Communication and process
        Sends => "sends",
        SentBy => "sentBy",
        Receives => "receives",
        ReceivedFrom => "receivedFrom",
        Notifies => "notifies",
        NotifiedBy => "notifiedBy",
        Approves => "approves",
        ApprovedBy => "approvedBy",
        Rejects => "rejects",
        RejectedBy => "rejectedBy",
        Assigns => "assigns",
        AssignedTo => "assignedTo",
    }
}

impl Default for NounType {
    fn default() -> Self {
        NounType::Other
    }
}

impl Default for VerbType {
    fn default() -> Self {
        VerbType::RelatedTo
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_sizes_are_canonical() {
        assert_eq!(NounType::ALL.len(), 42);
        assert_eq!(VerbType::ALL.len(), 127);
    }

    #[test]
    fn wire_names_round_trip() {
        for t in NounType::ALL {
            assert_eq!(t.as_str().parse::<NounType>().unwrap(), *t);
        }
        for v in VerbType::ALL {
            assert_eq!(v.as_str().parse::<VerbType>().unwrap(), *v);
        }
    }

    #[test]
    fn unknown_wire_name_is_rejected() {
        assert!("frobnicates".parse::<VerbType>().is_err());
        assert!(serde_json::from_str::<NounType>("\"gizmo\"").is_err());
    }

    #[test]
    fn serde_uses_wire_names() {
        assert_eq!(
            serde_json::to_string(&VerbType::BuiltOn).unwrap(),
            "\"builtOn\""
        );
        assert_eq!(
            serde_json::from_str::<NounType>("\"concept\"").unwrap(),
            NounType::Concept
        );
    }
}
